//! HTTP-upgrade collaborator for the realtime WebSocket endpoint (§6).
//!
//! Everything auth- and session-shaped happens before the upgrade, the
//! same as any other authenticated route: `requires_user_login` resolves
//! the session and stashes `user_id`/`device_id` in the depot. Past that
//! point this handler's only job is building a [`ConnectionMeta`] from the
//! request and handing the split socket to [`spawn_connection`].

use salvo::websocket::WebSocketUpgrade;

use crate::prelude::*;
use crate::realtime::RealtimeCore;
use crate::realtime::connection::{ConnectionMeta, spawn_connection};
use crate::realtime::transport::SalvoWebSocketTransport;

pub fn router(path: &str) -> Router {
    Router::with_path(path)
        .requires_user_login()
        .user_rate_limit(&RateLimit::per_minute(10))
        .goal(upgrade)
}

#[endpoint(tags("realtime"), security(("jwt" = [])))]
async fn upgrade(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> AppResult<()> {
    let user_id = depot.user_id();
    let device_id = depot.device_id().to_string();
    let (user_agent, ip) = crate::auth::util::get_device_and_ip(req);
    let meta = ConnectionMeta {
        ip,
        user_agent,
        platform: req.header::<String>("sec-ch-ua-platform"),
        app_version: req.header::<String>("x-app-version"),
    };

    let core = RealtimeCore::global();
    let repository = core.repository.clone();

    WebSocketUpgrade::new()
        .upgrade(req, res, move |socket| async move {
            let transport: Box<dyn crate::realtime::transport::Transport> =
                Box::new(SalvoWebSocketTransport::new(socket));
            let handle = spawn_connection(
                transport,
                user_id,
                device_id.clone(),
                meta.clone(),
                core.hub.clone(),
                core.router.clone(),
                core.dispatcher.clone(),
                core.metrics.clone(),
                core.rate_limiters(),
                core.validators.clone(),
                core.connection_config.clone(),
                core.lifecycle.clone(),
                core.repository.clone(),
            );
            core.hub.register(user_id, &device_id, handle.clone());
            if let Err(err) = repository
                .create_connection(handle.id(), user_id, &device_id, &meta)
                .await
            {
                tracing::warn!(%err, "failed to persist connection open");
            }
        })
        .await
        .map_err(|err| {
            tracing::warn!(%err, "websocket upgrade failed");
            AppError::InvalidAccess
        })
}
