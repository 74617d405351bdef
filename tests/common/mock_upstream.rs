use actix_web::dev::ServerHandle;
use actix_web::http::StatusCode;
use actix_web::http::header::{ACCEPT, CONTENT_TYPE};
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
use bytes::Bytes;
use futures::stream;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What the mock provider answers to every completion call.
#[derive(Clone, Debug)]
pub enum MockReply {
    Json(Value),
    Text(u16, String),
    /// Body chunks written one by one as an event stream.
    EventStream(Vec<&'static str>),
}

/// Headers and body of the last call the mock received.
#[derive(Clone, Debug)]
pub struct CapturedRequest {
    pub api_key: Option<String>,
    pub accept: Option<String>,
    pub content_type: Option<String>,
    pub body: Value,
}

struct MockState {
    reply: MockReply,
    hits: AtomicUsize,
    last_request: Mutex<Option<CapturedRequest>>,
}

/// Provider stand-in serving `/models/chat/completions` on an ephemeral port.
pub struct MockUpstream {
    pub url: String,
    state: web::Data<MockState>,
    handle: ServerHandle,
}

impl MockUpstream {
    pub async fn start(reply: MockReply) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind mock upstream");
        let port = listener.local_addr().expect("mock upstream addr").port();

        let state = web::Data::new(MockState {
            reply,
            hits: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        });
        let app_state = state.clone();

        let server = HttpServer::new(move || {
            App::new()
                .app_data(app_state.clone())
                .route("/models/chat/completions", web::post().to(completions))
        })
        .workers(1)
        .disable_signals()
        .shutdown_timeout(1)
        .listen(listener)
        .expect("listen mock upstream")
        .run();

        let handle = server.handle();
        actix_web::rt::spawn(server);

        Self {
            url: format!("http://127.0.0.1:{}", port),
            state,
            handle,
        }
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CapturedRequest> {
        self.state.last_request.lock().unwrap().clone()
    }

    pub async fn stop(self) {
        self.handle.stop(false).await;
    }
}

fn header(req: &HttpRequest, name: actix_web::http::header::HeaderName) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn completions(
    req: HttpRequest,
    body: Bytes,
    state: web::Data<MockState>,
) -> HttpResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let captured = CapturedRequest {
        api_key: req
            .headers()
            .get("api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        accept: header(&req, ACCEPT),
        content_type: header(&req, CONTENT_TYPE),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    };
    *state.last_request.lock().unwrap() = Some(captured);

    match &state.reply {
        MockReply::Json(value) => HttpResponse::Ok().json(value),
        MockReply::Text(code, text) => {
            HttpResponse::build(StatusCode::from_u16(*code).unwrap()).body(text.clone())
        }
        MockReply::EventStream(chunks) => {
            let chunks = chunks
                .clone()
                .into_iter()
                .map(|c| Ok::<_, actix_web::Error>(Bytes::from_static(c.as_bytes())));
            HttpResponse::Ok()
                .content_type("text/event-stream")
                .streaming(stream::iter(chunks))
        }
    }
}
