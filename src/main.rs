use std::{path::PathBuf, process, sync::Arc};

use recipes::{
    application::{
        catalog::Catalog,
        error::AppError,
        tokens::{self, TokenManager},
    },
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
        watcher::FileWatcher,
    },
    presentation::{templates::PageTemplates, views::TemplateRenderer},
};
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::IssueToken(args) => run_issue_token(&settings, &args.identifier),
        config::Command::InitTokensKey(_) => run_init_tokens_key(&settings),
    }
}

fn run_issue_token(settings: &config::Settings, identifier: &str) -> Result<(), AppError> {
    let key = tokens::read_key_file(&settings.tokens.key_file)?;
    println!("{}", tokens::TokenSigner::new(&key)?.issue(identifier));
    Ok(())
}

fn run_init_tokens_key(settings: &config::Settings) -> Result<(), AppError> {
    tokens::init_key_file(&settings.tokens.key_file)?;
    info!(
        op = "tokens::init_key",
        key_file = %settings.tokens.key_file.display(),
        "Token key written"
    );
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let templates = Arc::new(PageTemplates::load(
        settings.paths.templates_dir.clone(),
        settings.paths.templates_extension.clone(),
    )?);
    let renderer = Arc::new(TemplateRenderer::new(
        Arc::clone(&templates),
        settings.server.base_url.clone(),
    ));
    let catalog = Arc::new(Catalog::open(
        settings.paths.recipes_dir.clone(),
        renderer.clone(),
    )?);
    info!(
        op = "serve::startup",
        recipes = catalog.len(),
        recipes_dir = %settings.paths.recipes_dir.display(),
        "Recipes loaded"
    );

    let tokens = Arc::new(TokenManager::load(
        &settings.tokens.key_file,
        settings.tokens.file.clone(),
        settings.tokens.cookie_name.clone(),
    )?);

    let watcher = start_watcher(&settings, &templates, &catalog, &tokens)?;

    let state = HttpState {
        catalog,
        renderer,
        tokens,
        base_url: Arc::from(settings.server.base_url.as_str()),
        secure_cookies: settings.server.secure_cookies,
        static_dir: Arc::new(PathBuf::from(&settings.paths.static_dir)),
    };
    let result = serve_http(&settings, state).await;

    drop(watcher);
    result
}

/// Template edits swap the template set and drop every cached page; token
/// file edits re-verify the tokens.
fn start_watcher(
    settings: &config::Settings,
    templates: &Arc<PageTemplates>,
    catalog: &Arc<Catalog>,
    tokens: &Arc<TokenManager>,
) -> Result<FileWatcher, AppError> {
    let watcher = FileWatcher::start(settings.watcher.debounce)?;

    let templates_dir = templates.dir().to_path_buf();
    let (templates, catalog) = (Arc::clone(templates), Arc::clone(catalog));
    watcher.watch_dir(
        &templates_dir,
        Arc::new(move |_paths: &[PathBuf]| {
            if templates.reload().is_ok() {
                catalog.invalidate_all();
            }
        }),
    )?;

    let manager = Arc::clone(tokens);
    let tokens_file = manager.file().to_path_buf();
    watcher.watch_file(
        &tokens_file,
        Arc::new(move |_paths: &[PathBuf]| {
            // A rejected file is logged by the manager and leaves the old tokens.
            let _ = manager.reload();
        }),
    )?;

    Ok(watcher)
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(
        op = "serve::listen",
        addr = %settings.server.addr,
        base_url = %settings.server.base_url,
        "Listening"
    );

    let stopping = Arc::new(Notify::new());
    let signal = Arc::clone(&stopping);
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            shutdown_signal().await;
            signal.notify_one();
        },
    );

    let grace = settings.server.graceful_shutdown;
    tokio::select! {
        result = server => result.map_err(InfraError::from)?,
        _ = async {
            stopping.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                op = "serve::shutdown",
                grace_seconds = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
        }
    }

    info!(op = "serve::shutdown", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(op = "serve::shutdown", "Shutdown signal received");
}
