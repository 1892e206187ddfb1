// Property tests for the recovery time flag and the dashboard summary

use chrono::{Duration, Utc};
use proptest::prelude::*;
use rtm_backup::backup::recovery_time_target_met;
use rtm_backup::monitor::summarize;
use rtm_backup::{BackupMetric, MonitorConfig};

proptest! {
    #[test]
    fn rto_met_up_to_five_minutes(duration in 0.0f64..=300.0) {
        prop_assert!(recovery_time_target_met(duration));
    }

    #[test]
    fn rto_missed_beyond_five_minutes(excess in 0.001f64..1.0e6) {
        prop_assert!(!recovery_time_target_met(300.0 + excess));
    }

    #[test]
    fn dashboard_counts_are_consistent(
        runs in prop::collection::vec((any::<bool>(), 0.0f64..7200.0, 0i64..(14 * 24)), 0..40)
    ) {
        let now = Utc::now();
        let metrics: Vec<BackupMetric> = runs
            .iter()
            .map(|&(success, duration_seconds, hours_ago)| BackupMetric {
                run_id: None,
                timestamp: now - Duration::hours(hours_ago),
                duration_seconds,
                success,
                successful_destinations: usize::from(success),
                total_destinations: 1,
                success_ratio: if success { 1.0 } else { 0.0 },
                integrity_validated: success,
                total_size_bytes: 1,
                encrypted: false,
                error: None,
            })
            .collect();

        let summary = summarize(&MonitorConfig::default(), &metrics, &[], now);

        prop_assert_eq!(summary.total_runs, metrics.len());
        prop_assert_eq!(summary.successful_runs + summary.failed_runs, summary.total_runs);
        prop_assert!((0.0..=1.0).contains(&summary.success_rate));
        prop_assert!((0.0..=1.0).contains(&summary.sla_compliance_rate));
        prop_assert!(summary.last_24h.runs <= summary.last_7d.runs);
        prop_assert!(summary.last_7d.runs <= summary.total_runs);
        prop_assert_eq!(summary.last_run.is_some(), !metrics.is_empty());
    }
}
