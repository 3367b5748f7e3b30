// 仅在 Unix 系统下需要清理遗留的 socket 文件。
#[cfg(unix)]
use std::{fs, path::Path};

use actix_web::{middleware::Logger, web, App, HttpServer};
use odp_domain::config::{ApiConfig, ConfigError, Listener};
use odp_domain::event_url::{EventTokenSigner, EventUrlError};
use odp_domain::services::telemetry::{init_telemetry, TelemetryConfig, TelemetryError};
use odp_storage::SeaOrmStorage;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    handlers::{
        event_handler, execute_handler, metrics_handler, render_handler,
        training_examples_handler, web_trigger_handler,
    },
    state::AppState,
};

// 按监听配置绑定服务器；Unix socket 绑定前先删除上次遗留的文件。
macro_rules! bind_listener {
    ($server:expr, $listener:expr) => {
        match $listener {
            Listener::Tcp(address) => $server.bind(address.as_str())?,
            #[cfg(unix)]
            Listener::Unix(path) => {
                cleanup_socket(path)?;
                $server.bind_uds(path.as_str())?
            }
            #[cfg(not(unix))]
            Listener::Unix(path) => {
                return Err(BootstrapError::Io(std::io::Error::other(format!(
                    "unix socket '{path}' requested but this platform does not support it"
                ))));
            }
        }
    };
}

// 应用程序启动入口函数。
pub async fn run() -> Result<(), BootstrapError> {
    // 1. 加载配置并初始化遥测，读取 "API_" 前缀的环境变量。
    let config = ApiConfig::load_from_env()?;
    let telemetry = init_telemetry(&TelemetryConfig::from_env("API"))?;

    // 2. 连接数据库，worker 的所有端口都由同一个存储实现。
    let storage = SeaOrmStorage::connect(config.database_url()).await?;
    let signer = match config.event_key() {
        Some(key) => EventTokenSigner::new(key)?,
        None => {
            warn!("API_EVENT_KEY not set, tracking links will not survive a restart");
            EventTokenSigner::random()
        }
    };
    let state = AppState::with_storage(storage, config.public_url(), signer, telemetry);

    // 3. 公共服务器：worker 路由；没有内部监听器时顺带暴露指标。
    let metrics_on_public = config.internal_listener().is_none();
    let public_state = state.clone();
    let public_server = HttpServer::new(move || {
        let mut app = App::new()
            .app_data(web::Data::new(public_state.clone()))
            .wrap(Logger::default())
            .configure(worker_routes);
        if metrics_on_public {
            app = app.route("/metrics", web::get().to(metrics_handler));
        }
        app
    });
    let public_server = bind_listener!(public_server, config.public_listener()).run();
    info!(listener = %config.public_listener(), public_url = config.public_url(), "public api listening");

    // 4. 可选的内部服务器，只暴露指标。
    let Some(internal_listener) = config.internal_listener() else {
        public_server.await?;
        return Ok(());
    };
    let internal_server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(Logger::default())
            .route("/metrics", web::get().to(metrics_handler))
    });
    let internal_server = bind_listener!(internal_server, internal_listener).run();
    info!(listener = %internal_listener, "internal metrics listening");

    // 5. 并发运行两个服务器，任何一个出错都会导致整体退出。
    tokio::try_join!(public_server, internal_server)?;
    Ok(())
}

/// Routes exposing the isolated-worker operations.
pub fn worker_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/v1/execute", web::post().to(execute_handler))
        .route("/api/v1/render", web::post().to(render_handler))
        .route("/api/v1/event/{token}", web::get().to(event_handler))
        .route("/api/v1/web-trigger", web::post().to(web_trigger_handler))
        .route(
            "/api/v1/training-examples",
            web::post().to(training_examples_handler),
        );
}

// 启动过程中的错误枚举。
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("storage error: {0}")]
    Storage(#[from] odp_domain::storage::StorageError),
    #[error("event signing error: {0}")]
    EventKey(#[from] EventUrlError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// 清理 Unix Socket 文件：文件已存在时 bind 会失败。
#[cfg(unix)]
fn cleanup_socket(path: &str) -> std::io::Result<()> {
    let socket_path = Path::new(path);
    if socket_path.exists() {
        fs::remove_file(socket_path)?;
    }
    Ok(())
}
