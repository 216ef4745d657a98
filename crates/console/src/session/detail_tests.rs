use super::*;

fn log(id: &str, name: &str, ts: i64) -> LogEntryMsg {
    LogEntryMsg { container_id: id.to_owned(), container_name: name.to_owned(), ts, level: "info".to_owned(), message: "m".to_owned() }
}

#[test]
fn entering_same_target_does_not_reset() {
    let mut detail = DetailState::new();
    detail.enter(DetailTarget::Container("c1".to_owned()), None);
    detail.push_streamed(log("c1", "web", 1));
    detail.enter(DetailTarget::Container("c1".to_owned()), None);
    assert_eq!(detail.logs().len(), 1);
}

#[test]
fn entering_different_target_resets() {
    let mut detail = DetailState::new();
    detail.enter(DetailTarget::Container("c1".to_owned()), None);
    detail.push_streamed(log("c1", "web", 1));
    detail.enter(DetailTarget::Container("c2".to_owned()), None);
    assert!(detail.logs().is_empty());
}

#[test]
fn filters_suppress_streaming() {
    let mut detail = DetailState::new();
    detail.enter(DetailTarget::Container("c1".to_owned()), None);
    detail.set_filters(LogFilters { level: Some("error".to_owned()), ..Default::default() });
    let pushed = detail.push_streamed(log("c1", "web", 1));
    assert!(!pushed);
    assert!(detail.logs().is_empty());
}

#[test]
fn deploy_separator_injected_on_id_change_same_name() {
    let mut detail = DetailState::new();
    detail.enter(DetailTarget::Container("c1".to_owned()), None);
    detail.push_streamed(log("c1", "web", 1));
    detail.push_streamed(log("c2", "web", 2));
    let logs = detail.logs();
    assert_eq!(logs.len(), 3);
    assert_eq!(logs[1].level, "event");
    assert_eq!(logs[2].container_id, "c2");
}

#[test]
fn no_separator_when_name_changes_too() {
    let mut detail = DetailState::new();
    detail.enter(DetailTarget::Project { project: "app".to_owned(), ids: vec!["c1".to_owned(), "c2".to_owned()] }, None);
    detail.push_streamed(log("c1", "web", 1));
    detail.push_streamed(log("c2", "worker", 2));
    assert_eq!(detail.logs().len(), 2);
}

#[test]
fn double_backfill_with_same_gen_is_a_no_op() {
    let mut detail = DetailState::new();
    detail.enter(DetailTarget::Container("c1".to_owned()), None);
    let resp = LogsBackfillResponse { gen: 1, entries: vec![log("c1", "web", 0)] };
    assert!(detail.apply_logs_backfill(resp.clone(), 1));
    assert_eq!(detail.logs().len(), 1);
    assert!(!detail.apply_logs_backfill(resp, 1));
    assert_eq!(detail.logs().len(), 1);
}

#[test]
fn stale_gen_backfill_is_discarded() {
    let mut detail = DetailState::new();
    detail.enter(DetailTarget::Container("c1".to_owned()), None);
    let resp = LogsBackfillResponse { gen: 1, entries: vec![log("c1", "web", 0)] };
    assert!(!detail.apply_logs_backfill(resp, 2));
    assert!(detail.logs().is_empty());
}

#[test]
fn backfill_only_prepends_entries_older_than_oldest_streamed() {
    let mut detail = DetailState::new();
    detail.enter(DetailTarget::Container("c1".to_owned()), None);
    detail.push_streamed(log("c1", "web", 10));
    let resp = LogsBackfillResponse { gen: 1, entries: vec![log("c1", "web", 5), log("c1", "web", 15)] };
    detail.apply_logs_backfill(resp, 1);
    let ts: Vec<i64> = detail.logs().iter().map(|e| e.ts).collect();
    assert_eq!(ts, vec![5, 10]);
}

#[test]
fn auto_switch_clears_backfill_flags() {
    let mut detail = DetailState::new();
    detail.enter(DetailTarget::Container("old".to_owned()), Some(("app".to_owned(), "web".to_owned())));
    detail.mark_metrics_backfill_pending();
    detail.mark_logs_backfill_pending();
    detail.switch_container("new".to_owned());
    assert_eq!(detail.target(), Some(&DetailTarget::Container("new".to_owned())));
    assert!(!detail.metrics_backfill_pending());
    assert!(!detail.logs_backfill_pending());
}
