//! Live reload is a WebSocket channel between the dev server and every open
//! browser tab.
//!
//! 1. **Accept thread**: takes incoming connections and upgrades them with
//!    `tungstenite`.
//! 2. **Broadcast thread**: waits for a signal and sends `"reload"` to every
//!    connected client, dropping the ones that went away.
//! 3. **Client script**: served by the HTTP server and injected into every
//!    HTML page, it connects to the channel and reloads the page on message.

use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tungstenite::WebSocket;

use crate::error::ServeError;

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Handle to a running reload channel.
pub struct LiveReload {
    pub port: u16,
    tx: Sender<()>,
    _threads: (JoinHandle<()>, JoinHandle<()>),
}

impl LiveReload {
    /// Starts the channel on the preferred port, or on an ephemeral one when
    /// the preferred port is taken.
    pub fn start(host: &str, preferred: u16) -> Result<Self, ServeError> {
        let (listener, port) = reserve_port(host, preferred)?;
        let clients: Clients = Arc::default();

        let accept = new_thread_ws_incoming(listener, clients.clone());
        let (tx, broadcast) = new_thread_ws_reload(clients);

        tracing::info!(port, "live reload channel ready");

        Ok(Self {
            port,
            tx,
            _threads: (accept, broadcast),
        })
    }

    /// A sender which triggers one reload per message.
    pub fn sender(&self) -> Sender<()> {
        self.tx.clone()
    }
}

/// The script injected into served pages.
pub fn client_script(port: u16) -> String {
    format!(
        r#"(() => {{
  const url = `ws://${{location.hostname || "localhost"}}:{port}`;
  const socket = new WebSocket(url);
  socket.addEventListener("message", (event) => {{
    if (event.data === "reload") location.reload();
  }});
}})();
"#
    )
}

fn reserve_port(host: &str, preferred: u16) -> Result<(TcpListener, u16), ServeError> {
    let listener = match TcpListener::bind((host, preferred)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind((host, 0)).map_err(|e| ServeError::Bind(format!("{host}:0"), e))?,
    };

    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("reload connection failed: {e}");
                    continue;
                }
            };

            match tungstenite::accept(stream) {
                Ok(socket) => clients.lock().unwrap_or_else(|e| e.into_inner()).push(socket),
                Err(e) => tracing::warn!("reload handshake failed: {e}"),
            }
        }
    })
}

fn new_thread_ws_reload(clients: Clients) -> (Sender<()>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel();

    let thread = std::thread::spawn(move || {
        while rx.recv().is_ok() {
            let mut clients = clients.lock().unwrap_or_else(|e| e.into_inner());
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send("reload".into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(tungstenite::error::Error::ConnectionClosed)
                    | Err(tungstenite::error::Error::AlreadyClosed) => broken.push(i),
                    Err(e) => {
                        tracing::error!("reload failed: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the last 10 connections
            let len = clients.len();
            if len > 10 {
                for mut socket in clients.drain(0..len - 10) {
                    socket.close(None).ok();
                }
            }

            tracing::debug!(clients = clients.len(), "sent reload");
        }
    });

    (tx, thread)
}
