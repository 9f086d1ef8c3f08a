//! In-order decode pipeline.
//!
//! Decodes run concurrently on blocking workers, but results come out in the
//! order the deltas were received, whatever order the workers finish in.

use std::future::Future;

use futures_util::StreamExt;
use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::FuturesOrdered;

use super::codec::{FrameDecoder, InboundAudioChunk};
use crate::error::SessionError;

pub type DecodeResult = Result<InboundAudioChunk, SessionError>;

pub struct DecodeQueue {
    decoder: FrameDecoder,
    pending: FuturesOrdered<BoxFuture<'static, DecodeResult>>,
}

impl DecodeQueue {
    pub fn new(decoder: FrameDecoder) -> Self {
        Self {
            decoder,
            pending: FuturesOrdered::new(),
        }
    }

    /// Start decoding `data` right away on a blocking worker.
    pub fn submit(&mut self, data: String) {
        let decoder = self.decoder;
        let handle = tokio::task::spawn_blocking(move || decoder.decode(&data));
        self.submit_future(async move {
            handle
                .await
                .map_err(|e| SessionError::Decode(format!("decode task failed: {}", e)))?
        });
    }

    /// Queue an arbitrary decode behind the ones already pending.
    pub fn submit_future<F>(&mut self, decode: F)
    where
        F: Future<Output = DecodeResult> + Send + 'static,
    {
        self.pending.push_back(decode.boxed());
    }

    /// Drop every pending decode. Their results are never delivered.
    ///
    /// Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending = FuturesOrdered::new();
        dropped
    }

    /// Next result in receipt order, or `None` when nothing is pending.
    pub async fn next(&mut self) -> Option<DecodeResult> {
        self.pending.next().await
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::{FrameEncoder, OUTPUT_SAMPLE_RATE};
    use tokio::sync::oneshot;

    fn tagged(tag: f32) -> InboundAudioChunk {
        InboundAudioChunk::new(vec![tag], OUTPUT_SAMPLE_RATE)
    }

    #[tokio::test]
    async fn results_follow_receipt_order_not_completion_order() {
        let mut queue = DecodeQueue::new(FrameDecoder::new(OUTPUT_SAMPLE_RATE));
        let (finish_a, a_done) = oneshot::channel::<()>();
        let (finish_b, b_done) = oneshot::channel::<()>();

        queue.submit_future(async move {
            let _ = a_done.await;
            Ok(tagged(0.1))
        });
        queue.submit_future(async move {
            let _ = b_done.await;
            Ok(tagged(0.2))
        });

        // B completes first.
        finish_b.send(()).unwrap();
        tokio::task::yield_now().await;
        finish_a.send(()).unwrap();

        let first = queue.next().await.unwrap().unwrap();
        let second = queue.next().await.unwrap().unwrap();
        assert_eq!(first.samples, vec![0.1]);
        assert_eq!(second.samples, vec![0.2]);
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn blocking_decode_yields_chunk_or_error() {
        let mut queue = DecodeQueue::new(FrameDecoder::new(OUTPUT_SAMPLE_RATE));
        let blob = FrameEncoder::new(OUTPUT_SAMPLE_RATE).encode(&[0.5; 240]);
        queue.submit(blob.data);
        queue.submit("not base64!".to_string());
        assert_eq!(queue.len(), 2);

        let chunk = queue.next().await.unwrap().unwrap();
        assert_eq!(chunk.len(), 240);
        assert!(matches!(queue.next().await, Some(Err(SessionError::Decode(_)))));
    }

    #[tokio::test]
    async fn cleared_decodes_are_never_delivered() {
        let mut queue = DecodeQueue::new(FrameDecoder::new(OUTPUT_SAMPLE_RATE));
        queue.submit_future(async { Ok(tagged(0.1)) });
        queue.submit_future(async { Ok(tagged(0.2)) });

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert!(queue.next().await.is_none());

        queue.submit_future(async { Ok(tagged(0.3)) });
        assert_eq!(queue.next().await.unwrap().unwrap().samples, vec![0.3]);
    }
}
