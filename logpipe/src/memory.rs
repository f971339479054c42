//! 메모리 모니터와 적응형 임계값
//!
//! 프로세스가 속한 시스템의 메모리 사용 비율을 주기적으로 샘플링하고,
//! 압박 수준에 따라 유효 심각도 임계값을 조정합니다.
//! - 고수위 초과: ERROR 미만 이벤트 차단
//! - 중수위 초과: WARN 미만 이벤트 차단
//! - 중수위 이하 복귀: 설정된 원래 임계값 복원
//!
//! 수집 경로는 원자적 u8 하나만 읽으므로 조정 비용이 수집 성능에
//! 영향을 주지 않습니다.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use sysinfo::System;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::event::Severity;
use crate::metrics::PipelineMetrics;

/// 유효 심각도 임계값
///
/// 수집 경로가 이벤트 수용 여부를 판단할 때 읽는 단일 원자값입니다.
pub struct EffectiveThreshold {
    /// 현재 유효 임계값 (Severity의 u8 표현)
    current: AtomicU8,
    /// 조정 전 저장된 원래 임계값 (조정 중일 때만 Some)
    saved: Mutex<Option<Severity>>,
}

impl EffectiveThreshold {
    /// 초기 임계값으로 생성
    pub fn new(initial: Severity) -> Self {
        PipelineMetrics::set_effective_threshold(initial);
        Self {
            current: AtomicU8::new(initial.as_u8()),
            saved: Mutex::new(None),
        }
    }

    /// 현재 유효 임계값 반환
    pub fn get(&self) -> Severity {
        Severity::from_u8(self.current.load(Ordering::Acquire))
    }

    /// 지정한 심각도의 이벤트가 수용되는지 판단
    pub fn allows(&self, severity: Severity) -> bool {
        severity >= self.get()
    }

    /// 임계값 조정 (원래 값은 최초 조정 시 한 번만 저장)
    ///
    /// 이미 같은 값이면 false를 반환합니다.
    pub fn adjust_to(&self, severity: Severity) -> bool {
        let mut saved = self.saved.lock();
        let current = Severity::from_u8(self.current.load(Ordering::Acquire));

        if current == severity {
            return false;
        }

        if saved.is_none() {
            *saved = Some(current);
        }

        self.current.store(severity.as_u8(), Ordering::Release);
        PipelineMetrics::set_effective_threshold(severity);
        true
    }

    /// 저장된 원래 임계값으로 복원
    ///
    /// 조정된 상태가 아니면 None을 반환합니다.
    pub fn restore(&self) -> Option<Severity> {
        let mut saved = self.saved.lock();
        let original = saved.take()?;

        self.current.store(original.as_u8(), Ordering::Release);
        PipelineMetrics::set_effective_threshold(original);
        Some(original)
    }

    /// 현재 조정된 상태인지 확인
    pub fn is_adjusted(&self) -> bool {
        self.saved.lock().is_some()
    }

    /// 조정 전 원래 임계값 (조정 중일 때만 Some)
    pub fn original(&self) -> Option<Severity> {
        *self.saved.lock()
    }
}

/// 임계값 조정 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdDecision {
    /// 임계값이 조정됨
    Adjusted(Severity),
    /// 원래 임계값으로 복원됨
    Restored(Severity),
    /// 변화 없음
    Unchanged,
}

/// 메모리 모니터
pub struct MemoryMonitor {
    /// 공유 유효 임계값
    threshold: std::sync::Arc<EffectiveThreshold>,
    /// 고수위 임계값 (기본값: 0.85)
    high: f64,
    /// 중수위 임계값 (기본값: 0.70)
    medium: f64,
}

impl MemoryMonitor {
    /// 설정에서 메모리 모니터 생성
    pub fn new(threshold: std::sync::Arc<EffectiveThreshold>, config: &PipelineConfig) -> Self {
        Self {
            threshold,
            high: config.memory_high_threshold,
            medium: config.memory_medium_threshold,
        }
    }

    /// 시스템에서 메모리 사용 비율 샘플링
    pub fn sample_system(&self, sys: &mut System) -> f64 {
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return 0.0;
        }
        sys.used_memory() as f64 / total as f64
    }

    /// 샘플 하나를 반영해 임계값을 조정
    ///
    /// 판정 로직이 샘플링과 분리되어 있어 테스트에서 임의 비율을 주입할 수
    /// 있습니다. 동일 구간의 반복 샘플은 변화를 만들지 않습니다.
    pub fn apply_sample(&self, ratio: f64) -> ThresholdDecision {
        PipelineMetrics::set_memory_usage_ratio(ratio);

        if ratio > self.high {
            return self.adjust(ratio, Severity::Error);
        }

        if ratio > self.medium {
            return self.adjust(ratio, Severity::Warn);
        }

        match self.threshold.restore() {
            Some(original) => {
                info!(
                    ratio = ratio,
                    restored = original.as_str(),
                    "메모리 압박 해소, 임계값 복원"
                );
                ThresholdDecision::Restored(original)
            }
            None => ThresholdDecision::Unchanged,
        }
    }

    /// 목표 임계값 적용
    ///
    /// 설정된 원래 임계값이 목표보다 엄격하면 그대로 둡니다.
    fn adjust(&self, ratio: f64, target: Severity) -> ThresholdDecision {
        let baseline = self.threshold.original().unwrap_or_else(|| self.threshold.get());
        let effective = target.max(baseline);

        if self.threshold.adjust_to(effective) {
            warn!(
                ratio = ratio,
                threshold = effective.as_str(),
                "메모리 압박 감지, 임계값 조정"
            );
            ThresholdDecision::Adjusted(effective)
        } else {
            ThresholdDecision::Unchanged
        }
    }

    /// 고수위 임계값
    pub fn high_watermark(&self) -> f64 {
        self.high
    }

    /// 중수위 임계값
    pub fn medium_watermark(&self) -> f64 {
        self.medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn monitor_with(initial: Severity) -> (MemoryMonitor, Arc<EffectiveThreshold>) {
        let threshold = Arc::new(EffectiveThreshold::new(initial));
        let config = PipelineConfig::default();
        (MemoryMonitor::new(threshold.clone(), &config), threshold)
    }

    #[test]
    fn test_allows_respects_threshold() {
        let threshold = EffectiveThreshold::new(Severity::Warn);
        assert!(threshold.allows(Severity::Warn));
        assert!(threshold.allows(Severity::Fatal));
        assert!(!threshold.allows(Severity::Info));
    }

    #[test]
    fn test_high_pressure_raises_to_error() {
        let (monitor, threshold) = monitor_with(Severity::Trace);

        let decision = monitor.apply_sample(0.90);
        assert_eq!(decision, ThresholdDecision::Adjusted(Severity::Error));
        assert_eq!(threshold.get(), Severity::Error);
        assert!(threshold.is_adjusted());
    }

    #[test]
    fn test_medium_pressure_raises_to_warn() {
        let (monitor, threshold) = monitor_with(Severity::Trace);

        let decision = monitor.apply_sample(0.75);
        assert_eq!(decision, ThresholdDecision::Adjusted(Severity::Warn));
        assert_eq!(threshold.get(), Severity::Warn);
    }

    #[test]
    fn test_repeated_sample_in_same_band_is_idempotent() {
        let (monitor, threshold) = monitor_with(Severity::Trace);

        assert_eq!(
            monitor.apply_sample(0.92),
            ThresholdDecision::Adjusted(Severity::Error)
        );
        assert_eq!(monitor.apply_sample(0.95), ThresholdDecision::Unchanged);
        assert_eq!(threshold.get(), Severity::Error);
    }

    #[test]
    fn test_easing_pressure_steps_down_then_restores() {
        let (monitor, threshold) = monitor_with(Severity::Debug);

        monitor.apply_sample(0.92);
        assert_eq!(threshold.get(), Severity::Error);

        let decision = monitor.apply_sample(0.78);
        assert_eq!(decision, ThresholdDecision::Adjusted(Severity::Warn));
        assert_eq!(threshold.get(), Severity::Warn);

        let decision = monitor.apply_sample(0.60);
        assert_eq!(decision, ThresholdDecision::Restored(Severity::Debug));
        assert_eq!(threshold.get(), Severity::Debug);
        assert!(!threshold.is_adjusted());
    }

    #[test]
    fn test_original_saved_only_once() {
        let (monitor, threshold) = monitor_with(Severity::Info);

        monitor.apply_sample(0.75); // Warn으로 조정, Info 저장
        monitor.apply_sample(0.92); // Error로 조정, 저장값 유지
        assert_eq!(threshold.original(), Some(Severity::Info));

        monitor.apply_sample(0.40);
        assert_eq!(threshold.get(), Severity::Info);
    }

    #[test]
    fn test_stricter_configured_threshold_is_kept() {
        let (monitor, threshold) = monitor_with(Severity::Error);

        // 중수위 압박은 Warn을 목표로 하지만 설정값이 더 엄격함
        assert_eq!(monitor.apply_sample(0.75), ThresholdDecision::Unchanged);
        assert_eq!(threshold.get(), Severity::Error);

        // 복원해도 Error 그대로
        monitor.apply_sample(0.30);
        assert_eq!(threshold.get(), Severity::Error);
    }

    #[test]
    fn test_boundary_values() {
        let (monitor, threshold) = monitor_with(Severity::Trace);

        // 정확히 고수위면 중수위 구간으로 취급
        assert_eq!(
            monitor.apply_sample(0.85),
            ThresholdDecision::Adjusted(Severity::Warn)
        );

        // 정확히 중수위면 복원 구간으로 취급
        assert_eq!(
            monitor.apply_sample(0.70),
            ThresholdDecision::Restored(Severity::Trace)
        );
        assert_eq!(threshold.get(), Severity::Trace);
    }

    #[test]
    fn test_restore_without_adjustment_is_noop() {
        let (monitor, threshold) = monitor_with(Severity::Trace);
        assert_eq!(monitor.apply_sample(0.10), ThresholdDecision::Unchanged);
        assert_eq!(threshold.get(), Severity::Trace);
    }

    #[test]
    fn test_sample_system_returns_ratio_in_range() {
        let (monitor, _) = monitor_with(Severity::Trace);
        let mut sys = System::new();
        let ratio = monitor.sample_system(&mut sys);
        assert!((0.0..=1.0).contains(&ratio));
    }
}
