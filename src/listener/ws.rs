use super::{ChangeTransport, SignalHandler, TransportSignal};
use std::cell::RefCell;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::JsCast;
use web_sys::{CloseEvent, Event, MessageEvent, WebSocket};

struct Connection {
    socket: WebSocket,

    // Keep handles alive for as long as the socket can fire them.
    _on_open: Closure<dyn FnMut(Event)>,
    _on_message: Closure<dyn FnMut(MessageEvent)>,
    _on_close: Closure<dyn FnMut(CloseEvent)>,
}

impl Connection {
    fn detach(self) {
        self.socket.set_onopen(None);
        self.socket.set_onmessage(None);
        self.socket.set_onclose(None);
        let _ = self.socket.close();
    }
}

/// Browser WebSocket carrying the block listener protocol.
pub(crate) struct WebSocketTransport {
    url: String,
    connection: RefCell<Option<Connection>>,
}

impl WebSocketTransport {
    pub fn new(url: String) -> Self {
        Self {
            url,
            connection: RefCell::new(None),
        }
    }
}

impl ChangeTransport for WebSocketTransport {
    fn connect(&self, on_signal: SignalHandler) {
        if let Some(old) = self.connection.borrow_mut().take() {
            old.detach();
        }

        let socket = match WebSocket::new(&self.url) {
            Ok(socket) => socket,
            Err(e) => {
                log::warn!("listener: cannot open {}: {:?}", self.url, e);
                on_signal(TransportSignal::Disconnected);
                return;
            }
        };

        let sig = on_signal.clone();
        let on_open = Closure::<dyn FnMut(Event)>::new(move |_ev: Event| {
            sig(TransportSignal::Connected);
        });

        let sig = on_signal.clone();
        let on_message = Closure::<dyn FnMut(MessageEvent)>::new(move |ev: MessageEvent| {
            if let Some(text) = ev.data().as_string() {
                sig(TransportSignal::Message(text));
            }
        });

        // `error` is always followed by `close`, so only `close` is handled.
        let sig = on_signal;
        let on_close = Closure::<dyn FnMut(CloseEvent)>::new(move |ev: CloseEvent| {
            log::debug!("listener socket closed: code={} reason={}", ev.code(), ev.reason());
            sig(TransportSignal::Disconnected);
        });

        socket.set_onopen(Some(on_open.as_ref().unchecked_ref()));
        socket.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
        socket.set_onclose(Some(on_close.as_ref().unchecked_ref()));

        *self.connection.borrow_mut() = Some(Connection {
            socket,
            _on_open: on_open,
            _on_message: on_message,
            _on_close: on_close,
        });
    }

    fn send(&self, frame: String) {
        let conn = self.connection.borrow();
        let Some(conn) = conn.as_ref() else {
            return;
        };
        if conn.socket.ready_state() != WebSocket::OPEN {
            return;
        }
        if let Err(e) = conn.socket.send_with_str(&frame) {
            log::warn!("listener: send failed: {:?}", e);
        }
    }

    fn disconnect(&self) {
        if let Some(conn) = self.connection.borrow_mut().take() {
            conn.detach();
        }
    }
}
