//! Response listener: the only reader of the socket.
//!
//! One listener task runs per connection generation. It pulls bytes off the
//! socket, cuts them into frames, decodes each payload with the options stored
//! for its token, and routes the result into the [`TokenTable`]:
//!
//! - token [`BROADCAST_TOKEN`](crate::protocol::BROADCAST_TOKEN) → every currently registered waiter
//! - any other token → that token's waiter, or buffered for a later wait;
//!   dropped if no request for it is outstanding
//!
//! Any read or decode failure is fatal: every waiter is woken with a failure,
//! the table is marked dead, and the task exits. The listener never panics.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::JsonCodec;
use crate::protocol::{Frame, FrameBuffer};
use crate::token_table::{Failure, TokenTable};
use crate::transport::BoundedReader;

/// Socket read buffer size.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Background response listener for one generation.
pub struct ResponseListener<R> {
    reader: BoundedReader<R>,
    table: Arc<TokenTable>,
    frames: FrameBuffer,
    shutdown: CancellationToken,
}

impl<R> ResponseListener<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Create a listener over `reader` feeding `table`.
    pub fn new(
        reader: BoundedReader<R>,
        table: Arc<TokenTable>,
        max_payload_size: u32,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            reader,
            table,
            frames: FrameBuffer::with_max_payload(max_payload_size),
            shutdown,
        }
    }

    /// Spawn the listener loop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until the socket fails, a payload cannot be decoded, or shutdown is signalled.
    pub async fn run(mut self) {
        let generation = self.table.generation();
        tracing::debug!("Response listener started for generation {}", generation);

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let read = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::debug!("Response listener for generation {} stopped", generation);
                    return;
                }
                read = self.reader.read_chunk(&mut buf) => read,
            };

            let n = match read {
                Ok(0) => return self.die("Connection closed by server.", None),
                Ok(n) => n,
                Err(e) => {
                    return self.die(&format!("Connection closed by server: {e}"), None);
                }
            };

            let frames = match self.frames.push(&buf[..n]) {
                Ok(frames) => frames,
                Err(e) => return self.die(&format!("Bad frame from server: {e}"), None),
            };

            for frame in frames {
                if let Err((token, failure)) = self.route(frame) {
                    let reason = format!("Bad response for token {token}, server is buggy.");
                    return self.die(&reason, Some((token, failure)));
                }
            }
        }
    }

    fn route(&self, frame: Frame) -> Result<(), (i64, Failure)> {
        let token = frame.token();
        let broadcast = frame.is_broadcast();
        let options = self.table.options_for(token);
        let response = JsonCodec::decode_response(frame.payload(), options.as_ref())
            .map_err(|e| (token, Failure::Malformed(e.to_string())))?;

        if broadcast {
            self.table.broadcast(&response);
        } else {
            tracing::debug!("Response {:?} for token {}", response.kind, token);
            self.table.note_data(token, Ok(response));
        }
        Ok(())
    }

    fn die(&self, reason: &str, culprit: Option<(i64, Failure)>) {
        tracing::error!(
            "Response listener for generation {} died: {}",
            self.table.generation(),
            reason
        );
        self.table.fail_all(reason, culprit);
    }
}
