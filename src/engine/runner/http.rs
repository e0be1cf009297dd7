use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;

use axum::Router;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use camino::Utf8PathBuf;
use console::style;
use tower_http::services::ServeDir;
use tracing::info;

use crate::error::ServeError;

const RELOAD_SCRIPT_PATH: &str = "/__deckbuild/reload.js";

/// Static file server running on its own thread.
pub struct DevServer {
    pub addr: SocketAddr,
    _thread: thread::JoinHandle<Result<(), anyhow::Error>>,
}

/// Serves `root` over HTTP. When `reload_port` is given every HTML page gets a
/// script connecting it to the live reload channel on that port.
pub fn start(
    root: Utf8PathBuf,
    host: &str,
    port: u16,
    reload_port: Option<u16>,
) -> Result<DevServer, ServeError> {
    let listener =
        TcpListener::bind((host, port)).map_err(|e| ServeError::Bind(format!("{host}:{port}"), e))?;
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;

    info!(url = %style(format!("http://localhost:{}/", addr.port())).yellow(), %root, "starting a HTTP server");

    let router = router(root, reload_port);
    let thread = thread::spawn(move || {
        let result = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(serve(listener, router));

        if let Err(e) = &result {
            tracing::error!("HTTP server stopped: {e}");
        }

        result
    });

    Ok(DevServer {
        addr,
        _thread: thread,
    })
}

async fn serve(listener: TcpListener, router: Router) -> Result<(), anyhow::Error> {
    let listener = tokio::net::TcpListener::from_std(listener)?;
    axum::serve(listener, router).await?;

    Ok(())
}

fn router(root: Utf8PathBuf, reload_port: Option<u16>) -> Router {
    let router = Router::new();

    let Some(port) = reload_port else {
        return router.fallback_service(ServeDir::new(root));
    };

    let script = Arc::<str>::from(super::reload::client_script(port));
    let tag = Arc::<str>::from(format!(r#"<script src="{RELOAD_SCRIPT_PATH}"></script>"#));

    router
        .route(
            RELOAD_SCRIPT_PATH,
            get(move || {
                let script = script.clone();
                async move {
                    (
                        [(header::CONTENT_TYPE, "text/javascript")],
                        script.to_string(),
                    )
                        .into_response()
                }
            }),
        )
        .fallback_service(ServeDir::new(root))
        .layer(axum::middleware::map_response(move |response: Response| {
            let tag = tag.clone();
            async move { inject_reload(&tag, response).await }
        }))
}

async fn inject_reload(tag: &str, response: Response) -> Response {
    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));

    if response.status() != StatusCode::OK || !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("couldn't read page body: {e}");
            parts.status = StatusCode::INTERNAL_SERVER_ERROR;
            parts.headers.remove(header::CONTENT_LENGTH);
            return Response::from_parts(parts, Body::empty());
        }
    };

    let html = inject_script(&String::from_utf8_lossy(&bytes), tag);
    parts.headers.remove(header::CONTENT_LENGTH);

    Response::from_parts(parts, Body::from(html))
}

/// Places `tag` right before the closing `</body>`, or at the end of the
/// document when there is none.
pub fn inject_script(html: &str, tag: &str) -> String {
    match html.rfind("</body>") {
        Some(index) => {
            let mut out = String::with_capacity(html.len() + tag.len());
            out.push_str(&html[..index]);
            out.push_str(tag);
            out.push_str(&html[index..]);
            out
        }
        None => format!("{html}{tag}"),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpStream;

    use super::*;

    fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        write!(
            stream,
            "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
        )
        .unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn script_goes_before_closing_body() {
        let html = "<html><body><p>hi</p></body></html>";

        assert_eq!(
            inject_script(html, "<script></script>"),
            "<html><body><p>hi</p><script></script></body></html>"
        );
        assert_eq!(inject_script("<p>hi</p>", "<s>"), "<p>hi</p><s>");
    }

    #[test]
    fn serves_files_and_injects_reload_script() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        std::fs::write(root.join("index.html"), "<body>slides</body>").unwrap();
        std::fs::write(root.join("notes.txt"), "plain").unwrap();

        let server = start(root, "127.0.0.1", 0, Some(35729)).unwrap();

        let page = get(server.addr, "/index.html");
        assert!(page.starts_with("HTTP/1.1 200"));
        assert!(page.contains(r#"slides<script src="/__deckbuild/reload.js"></script></body>"#));

        let text = get(server.addr, "/notes.txt");
        assert!(text.ends_with("plain"));
        assert!(!text.contains("<script"));

        let script = get(server.addr, RELOAD_SCRIPT_PATH);
        assert!(script.contains(":35729`"));
    }

    #[test]
    fn taken_port_is_a_bind_error() {
        let taken = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let result = start(".".into(), "127.0.0.1", port, None);

        assert!(matches!(result, Err(ServeError::Bind(..))));
    }
}
