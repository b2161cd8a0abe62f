//! Mock HTTP server helper for unit tests.

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Serve `app` on an ephemeral local port. Dropping or firing the returned
/// sender shuts the server down.
pub(crate) async fn spawn_mock(app: Router) -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = rx.await;
    });
    tokio::spawn(async move {
        let _ = server.await;
    });
    (format!("http://{addr}"), tx)
}
