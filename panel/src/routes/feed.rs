//! Server-sent events over a collection's change feed.

use std::convert::Infallible;

use actix_web::{http::header, web, HttpResponse};
use common::{repository::Document, Change};
use futures::{stream, Stream};
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::{debug, warn};

fn encode<T: Document>(change: &Change<T>) -> Option<web::Bytes> {
    match serde_json::to_string(change) {
        Ok(data) => Some(web::Bytes::from(format!(
            "event: {}\ndata: {}\n\n",
            change.kind, data
        ))),
        Err(e) => {
            warn!(collection = T::COLLECTION, id = %change.id, "Failed to encode change: {}", e);
            None
        }
    }
}

/// Frames every change received after subscription. A lagging subscriber
/// skips what it missed; the stream ends when the feed closes.
pub fn change_stream<T: Document>(
    rx: Receiver<Change<T>>,
) -> impl Stream<Item = Result<web::Bytes, Infallible>> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    if let Some(frame) = encode(&change) {
                        return Some((Ok(frame), rx));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(collection = T::COLLECTION, skipped, "Live feed subscriber lagged");
                }
                Err(RecvError::Closed) => {
                    debug!(collection = T::COLLECTION, "Live feed closed");
                    return None;
                }
            }
        }
    })
}

pub fn sse<T: Document>(rx: Receiver<Change<T>>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(change_stream(rx))
}
