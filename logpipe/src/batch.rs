//! 배치 처리기
//!
//! 비동기 큐에서 이벤트를 배치 단위로 꺼내 백엔드 싱크에 전달합니다.
//! 동시에 하나의 드레인만 허용하며, 겹치는 시도는 블로킹 없이 무시됩니다.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

use crate::metrics::PipelineMetrics;
use crate::queue::EventQueue;
use crate::sink::BackendSink;

/// 배치 처리기
pub struct BatchProcessor {
    /// 이벤트 큐
    queue: Arc<EventQueue>,
    /// 백엔드 싱크
    sink: Arc<dyn BackendSink>,
    /// 배치당 최대 이벤트 수
    batch_size: usize,
    /// 드레인 진행 중 플래그 (상호 배제)
    draining: AtomicBool,
    /// 싱크에 전달된 이벤트 누적 수
    dispatched: AtomicU64,
    /// 전달 실패 누적 수
    failures: AtomicU64,
}

impl BatchProcessor {
    /// 새 배치 처리기 생성
    pub fn new(queue: Arc<EventQueue>, sink: Arc<dyn BackendSink>, batch_size: usize) -> Self {
        Self {
            queue,
            sink,
            batch_size,
            draining: AtomicBool::new(false),
            dispatched: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// 한 배치 드레인 (최대 batch_size개)
    ///
    /// 다른 드레인이 진행 중이면 아무것도 하지 않고 0을 반환합니다.
    pub async fn run_once(&self) -> usize {
        if !self.try_acquire() {
            return 0;
        }

        let dispatched = self.drain(Some(self.batch_size)).await;
        self.release();

        if dispatched > 0 {
            debug!(dispatched = dispatched, "배치 드레인 완료");
        }
        dispatched
    }

    /// 큐가 빌 때까지 강제 드레인 후 싱크 플러시
    ///
    /// 다른 드레인이 진행 중이면 아무것도 하지 않고 0을 반환합니다.
    pub async fn flush_now(&self) -> usize {
        if !self.try_acquire() {
            return 0;
        }

        let dispatched = self.drain(None).await;
        if let Err(e) = self.sink.flush().await {
            error!(error = %e, "싱크 플러시 실패");
        }
        self.release();

        debug!(dispatched = dispatched, "강제 드레인 완료");
        dispatched
    }

    /// 싱크에 전달된 이벤트 누적 수
    pub fn dispatched_total(&self) -> u64 {
        self.dispatched.load(Ordering::Acquire)
    }

    /// 전달 실패 누적 수
    pub fn failures_total(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    fn try_acquire(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.draining.store(false, Ordering::Release);
    }

    /// 큐에서 이벤트를 꺼내 순서대로 싱크에 전달
    ///
    /// limit이 None이면 큐가 빌 때까지 계속합니다.
    async fn drain(&self, limit: Option<usize>) -> usize {
        let mut dispatched = 0;
        let mut taken = 0;

        while limit.is_none_or(|max| taken < max) {
            let Some(entry) = self.queue.pop() else {
                break;
            };
            taken += 1;

            match self.sink.dispatch(&entry).await {
                Ok(()) => {
                    dispatched += 1;
                    self.dispatched.fetch_add(1, Ordering::AcqRel);
                }
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::AcqRel);
                    PipelineMetrics::record_dispatch_failure();
                    error!(
                        seq = entry.event.seq,
                        sink = %entry.sink,
                        error = %e,
                        "이벤트 싱크 전달 실패"
                    );
                }
            }
        }

        if taken > 0 {
            PipelineMetrics::record_dispatched(dispatched as u64);
            PipelineMetrics::record_batch_run();
        }
        dispatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{LogEvent, Severity};
    use crate::queue::QueueEntry;
    use crate::sink::MemorySink;
    use anyhow::Result;
    use async_trait::async_trait;

    fn fill_queue(queue: &EventQueue, count: usize) {
        for i in 0..count {
            let event = LogEvent::new(Severity::Info, "app", format!("msg {}", i), &[]);
            assert!(queue.push(QueueEntry::new(event, "memory")));
        }
    }

    #[tokio::test]
    async fn test_run_once_respects_batch_size() {
        let queue = Arc::new(EventQueue::new(100));
        let sink = Arc::new(MemorySink::new());
        let processor = BatchProcessor::new(queue.clone(), sink.clone(), 4);

        fill_queue(&queue, 10);

        let dispatched = processor.run_once().await;
        assert_eq!(dispatched, 4);
        assert_eq!(queue.len(), 6);
        assert_eq!(sink.len().await, 4);
    }

    #[tokio::test]
    async fn test_flush_now_drains_everything() {
        let queue = Arc::new(EventQueue::new(100));
        let sink = Arc::new(MemorySink::new());
        let processor = BatchProcessor::new(queue.clone(), sink.clone(), 4);

        fill_queue(&queue, 17);

        let dispatched = processor.flush_now().await;
        assert_eq!(dispatched, 17);
        assert!(queue.is_empty());
        assert_eq!(processor.dispatched_total(), 17);
    }

    #[tokio::test]
    async fn test_dispatch_preserves_order() {
        let queue = Arc::new(EventQueue::new(100));
        let sink = Arc::new(MemorySink::new());
        let processor = BatchProcessor::new(queue.clone(), sink.clone(), 8);

        fill_queue(&queue, 20);
        while processor.run_once().await > 0 {}

        let events = sink.events().await;
        assert_eq!(events.len(), 20);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.message, format!("msg {}", i));
        }
        for pair in events.windows(2) {
            assert!(pair[0].seq < pair[1].seq);
        }
    }

    #[tokio::test]
    async fn test_concurrent_flush_is_mutually_exclusive() {
        let queue = Arc::new(EventQueue::new(100));
        let sink = Arc::new(MemorySink::new());
        let processor = Arc::new(BatchProcessor::new(queue.clone(), sink.clone(), 4));

        fill_queue(&queue, 30);

        let first = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.flush_now().await })
        };
        let second = {
            let processor = processor.clone();
            tokio::spawn(async move { processor.flush_now().await })
        };

        let r1 = first.await.unwrap();
        let r2 = second.await.unwrap();

        // 하나가 전부 드레인하고 다른 하나는 무시되거나 빈 큐를 만남
        assert_eq!(r1 + r2, 30);
        assert_eq!(r1.min(r2), 0);

        let events = sink.events().await;
        assert_eq!(events.len(), 30);
        let mut seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        seqs.sort_unstable();
        seqs.dedup();
        assert_eq!(seqs.len(), 30);
    }

    /// 항상 실패하는 싱크
    struct FailingSink;

    #[async_trait]
    impl BackendSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn dispatch(&self, _entry: &QueueEntry) -> Result<()> {
            Err(anyhow::anyhow!("sink unavailable"))
        }

        async fn flush(&self) -> Result<()> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_failures_are_counted_not_propagated() {
        let queue = Arc::new(EventQueue::new(100));
        let processor = BatchProcessor::new(queue.clone(), Arc::new(FailingSink), 8);

        fill_queue(&queue, 5);

        let dispatched = processor.flush_now().await;
        assert_eq!(dispatched, 0);
        assert_eq!(processor.failures_total(), 5);
        assert!(queue.is_empty());
    }
}
