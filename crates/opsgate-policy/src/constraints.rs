//! Constraint merging and enforcement.
//!
//! Constraints arrive from two sources, the triggering request and the policy
//! decision, and are merged with policy winning on conflict. Recognized keys:
//! - `allowed_envs` / `environments`: permitted environments (case-insensitive)
//! - `max_targets`: target ceiling for write actions (default 50)
//! - `maintenance_window`: `{start, end, timezone}` gating write actions
//! - `diagnostic_hints`: promql / traceql queries and trace ids for diagnostics

use crate::error::ConstraintViolation;
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use opsgate_core::{ActionKind, Constraints, ConstraintsConfig, ContextRef, PlanStep, RawConstraints};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Target ceiling applied when no `max_targets` is configured.
pub const DEFAULT_MAX_TARGETS: u64 = 50;

const TARGET_LIST_KEYS: [&str; 4] = ["targets", "resources", "namespaces", "items"];
const TARGET_SINGULAR_KEYS: [&str; 2] = ["resource", "name"];

// =============================================================================
// MERGING
// =============================================================================

/// Merge request-supplied constraints with policy-supplied constraints.
///
/// Policy keys overwrite request keys. Returns `None` when the merged map is
/// empty: "no constraints" is enforced differently from an empty map.
pub fn merge_constraints(
    request: Option<&RawConstraints>,
    policy: &Map<String, Value>,
) -> Option<Constraints> {
    let mut merged = request.map(decode_raw).unwrap_or_default();
    for (key, value) in policy {
        merged.insert(key.clone(), value.clone());
    }

    if merged.is_empty() {
        None
    } else {
        Some(Constraints::from_map(merged))
    }
}

fn decode_raw(raw: &RawConstraints) -> Map<String, Value> {
    match raw {
        RawConstraints::Map(map) => map.clone(),
        RawConstraints::Encoded(bytes) => {
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Map::new();
            }
            match serde_json::from_slice::<Map<String, Value>>(bytes) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring undecodable request constraints");
                    Map::new()
                }
            }
        }
    }
}

// =============================================================================
// ACCESSORS
// =============================================================================

/// Permitted environments. `allowed_envs` takes precedence over `environments`.
pub fn allowed_envs(constraints: &Constraints) -> Vec<String> {
    ["allowed_envs", "environments"]
        .iter()
        .filter_map(|key| constraints.get(key))
        .map(env_list)
        .find(|list| !list.is_empty())
        .unwrap_or_default()
}

fn env_list(value: &Value) -> Vec<String> {
    let names: Vec<&str> = match value {
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        Value::String(s) => s.split(',').collect(),
        _ => Vec::new(),
    };
    names
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `max_targets` when set to a positive integer.
pub fn max_targets(constraints: &Constraints) -> Option<u64> {
    let value = constraints.get("max_targets")?;
    let parsed = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.filter(|n| *n > 0)
}

/// A maintenance window in a specific timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub timezone: Tz,
}

impl MaintenanceWindow {
    /// Whether `now` falls inside `[start, end]`.
    ///
    /// A window with `end < start` wraps midnight. An `end` given to the
    /// minute includes that whole minute.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.timezone).time();
        let local = local.with_nanosecond(0).unwrap_or(local);
        let until = if self.end.second() == 0 {
            local.with_second(0).unwrap_or(local)
        } else {
            local
        };
        if self.end < self.start {
            local >= self.start || until <= self.end
        } else {
            local >= self.start && until <= self.end
        }
    }
}

/// Outcome of reading `maintenance_window`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowSpec {
    Absent,
    Malformed(String),
    Window(MaintenanceWindow),
}

fn parse_clock(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

/// Read `maintenance_window`. Unknown or invalid timezones fall back to UTC.
pub fn maintenance_window(constraints: &Constraints) -> WindowSpec {
    let value = match constraints.get("maintenance_window") {
        None | Some(Value::Null) => return WindowSpec::Absent,
        Some(value) => value,
    };
    let Some(obj) = value.as_object() else {
        return WindowSpec::Malformed("expected an object with start and end".to_string());
    };

    let clock = |key: &str| -> Result<NaiveTime, String> {
        let raw = obj
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("missing {}", key))?;
        parse_clock(raw).ok_or_else(|| format!("unparsable {} '{}'", key, raw))
    };
    let (start, end) = match (clock("start"), clock("end")) {
        (Ok(start), Ok(end)) => (start, end),
        (Err(detail), _) | (_, Err(detail)) => return WindowSpec::Malformed(detail),
    };

    let timezone = obj
        .get("timezone")
        .or_else(|| obj.get("tz"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|name| match name.parse::<Tz>() {
            Ok(tz) => Some(tz),
            Err(_) => {
                tracing::debug!(timezone = %name, "unknown maintenance window timezone, using UTC");
                None
            }
        })
        .unwrap_or(Tz::UTC);

    WindowSpec::Window(MaintenanceWindow {
        start,
        end,
        timezone,
    })
}

/// Query hints that seed diagnostics collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticHints {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub promql: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traceql: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace_ids: Vec<String>,
}

impl DiagnosticHints {
    /// Read `diagnostic_hints`. Anything unreadable yields no hints.
    pub fn from_constraints(constraints: Option<&Constraints>) -> Self {
        constraints
            .and_then(|c| c.get("diagnostic_hints"))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.promql.is_empty() && self.traceql.is_empty() && self.trace_ids.is_empty()
    }

    /// Append hints not already present.
    pub fn extend(&mut self, other: DiagnosticHints) {
        fn merge(into: &mut Vec<String>, from: Vec<String>) {
            for item in from {
                if !into.contains(&item) {
                    into.push(item);
                }
            }
        }
        merge(&mut self.promql, other.promql);
        merge(&mut self.traceql, other.traceql);
        merge(&mut self.trace_ids, other.trace_ids);
    }

    /// Write these hints into `diagnostic_hints`, creating the map if needed.
    pub fn apply_to(&self, constraints: Option<Constraints>) -> Option<Constraints> {
        if self.is_empty() {
            return constraints;
        }
        let mut constraints = constraints.unwrap_or_default();
        match serde_json::to_value(self) {
            Ok(value) => constraints.insert("diagnostic_hints", value),
            Err(e) => tracing::warn!(error = %e, "failed to encode diagnostic hints"),
        }
        Some(constraints)
    }
}

// =============================================================================
// TARGET ESTIMATION
// =============================================================================

/// Estimate how many targets a plan touches. Never returns zero.
pub fn estimate_targets(steps: &[PlanStep]) -> usize {
    if steps.is_empty() {
        return 1;
    }
    let total: usize = steps.iter().map(|s| targets_in_input(&s.input)).sum();
    total.max(1)
}

fn targets_in_input(input: &Value) -> usize {
    for key in TARGET_LIST_KEYS {
        if let Some(list) = input.get(key).and_then(Value::as_array) {
            if !list.is_empty() {
                return list.len();
            }
        }
    }
    let has_singular = TARGET_SINGULAR_KEYS
        .iter()
        .any(|key| input.get(key).is_some_and(|v| !v.is_null()));
    usize::from(has_singular)
}

// =============================================================================
// ENFORCEMENT
// =============================================================================

/// Enforces environment, maintenance-window and target-count constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintEngine {
    default_max_targets: u64,
    strict_windows: bool,
}

impl Default for ConstraintEngine {
    fn default() -> Self {
        Self {
            default_max_targets: DEFAULT_MAX_TARGETS,
            strict_windows: false,
        }
    }
}

impl ConstraintEngine {
    pub fn new(config: &ConstraintsConfig) -> Self {
        Self {
            default_max_targets: if config.default_max_targets == 0 {
                DEFAULT_MAX_TARGETS
            } else {
                config.default_max_targets
            },
            strict_windows: config.strict_windows,
        }
    }

    pub fn default_max_targets(&self) -> u64 {
        self.default_max_targets
    }

    /// Check every applicable constraint. The first violation is returned.
    ///
    /// Without constraints a write action is still bounded by the default
    /// target ceiling and a read action is unconstrained. Window and target
    /// checks apply to write actions only.
    pub fn enforce(
        &self,
        context: &ContextRef,
        constraints: Option<&Constraints>,
        steps: &[PlanStep],
        now: DateTime<Utc>,
        action_kind: ActionKind,
    ) -> Result<(), ConstraintViolation> {
        let Some(constraints) = constraints else {
            if action_kind.is_write() {
                self.check_targets(steps, self.default_max_targets)?;
            }
            return Ok(());
        };

        let allowed = allowed_envs(constraints);
        let environment = context.environment.trim();
        if !allowed.is_empty() && !allowed.iter().any(|e| e.eq_ignore_ascii_case(environment)) {
            return Err(ConstraintViolation::environment_not_allowed(
                environment,
                &allowed,
            ));
        }

        if !action_kind.is_write() {
            return Ok(());
        }

        match maintenance_window(constraints) {
            WindowSpec::Absent => {}
            WindowSpec::Malformed(detail) => {
                if self.strict_windows {
                    return Err(ConstraintViolation::malformed_window(&detail));
                }
                tracing::warn!(
                    tenant = %context.tenant,
                    detail = %detail,
                    "malformed maintenance window treated as no restriction"
                );
            }
            WindowSpec::Window(window) => {
                if !window.contains(now) {
                    let local = now.with_timezone(&window.timezone);
                    return Err(ConstraintViolation::outside_maintenance_window(
                        &local.format("%H:%M:%S").to_string(),
                        &window.start.format("%H:%M").to_string(),
                        &window.end.format("%H:%M").to_string(),
                        window.timezone.name(),
                    ));
                }
            }
        }

        let max = max_targets(constraints).unwrap_or(self.default_max_targets);
        self.check_targets(steps, max)
    }

    fn check_targets(&self, steps: &[PlanStep], max: u64) -> Result<(), ConstraintViolation> {
        let estimated = estimate_targets(steps);
        if estimated as u64 > max {
            return Err(ConstraintViolation::max_targets_exceeded(estimated, max));
        }
        Ok(())
    }
}

/// [`ConstraintEngine::enforce`] with default settings.
pub fn enforce_constraints(
    context: &ContextRef,
    constraints: Option<&Constraints>,
    steps: &[PlanStep],
    now: DateTime<Utc>,
    action_kind: ActionKind,
) -> Result<(), ConstraintViolation> {
    ConstraintEngine::default().enforce(context, constraints, steps, now, action_kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConstraintViolationKind;
    use chrono::TimeZone;
    use opsgate_core::Stage;
    use serde_json::json;

    fn constraints(value: Value) -> Constraints {
        match value {
            Value::Object(map) => Constraints::from_map(map),
            other => panic!("expected object, got {}", other),
        }
    }

    fn step_with(input: Value) -> PlanStep {
        PlanStep::new(Stage::Act, "kubectl", "scale", input)
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, hour, minute, 0).unwrap()
    }

    fn prod() -> ContextRef {
        ContextRef::new("acme", "prod")
    }

    // =========================================================================
    // MERGE
    // =========================================================================

    #[test]
    fn policy_wins_on_conflict() {
        let request = RawConstraints::Map(
            json!({"max_targets": 100, "allowed_envs": ["dev"]})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let policy = json!({"max_targets": 10}).as_object().cloned().unwrap();

        let merged = merge_constraints(Some(&request), &policy).unwrap();
        assert_eq!(merged.get("max_targets"), Some(&json!(10)));
        assert_eq!(merged.get("allowed_envs"), Some(&json!(["dev"])));
    }

    #[test]
    fn merge_decodes_encoded_bytes() {
        let request = RawConstraints::Encoded(br#"{"allowed_envs":["staging"]}"#.to_vec());
        let merged = merge_constraints(Some(&request), &Map::new()).unwrap();
        assert_eq!(allowed_envs(&merged), vec!["staging".to_string()]);
    }

    #[test]
    fn merge_of_nothing_is_none() {
        assert_eq!(merge_constraints(None, &Map::new()), None);
        let empty = RawConstraints::Map(Map::new());
        assert_eq!(merge_constraints(Some(&empty), &Map::new()), None);
        let garbage = RawConstraints::Encoded(b"not json".to_vec());
        assert_eq!(merge_constraints(Some(&garbage), &Map::new()), None);
    }

    // =========================================================================
    // TARGET ESTIMATION
    // =========================================================================

    #[test]
    fn estimate_never_returns_zero() {
        assert_eq!(estimate_targets(&[]), 1);
        assert_eq!(estimate_targets(&[step_with(json!({}))]), 1);
        assert_eq!(estimate_targets(&[step_with(Value::Null)]), 1);
    }

    #[test]
    fn estimate_counts_first_non_empty_list() {
        assert_eq!(estimate_targets(&[step_with(json!({"targets": ["a", "b"]}))]), 2);
        assert_eq!(
            estimate_targets(&[step_with(json!({"targets": [], "resources": ["x", "y", "z"]}))]),
            3
        );
        assert_eq!(
            estimate_targets(&[step_with(json!({"namespaces": ["a"], "items": ["1", "2"]}))]),
            1
        );
    }

    #[test]
    fn estimate_sums_across_steps() {
        let steps = vec![
            step_with(json!({"name": "api"})),
            step_with(json!({"resource": "deploy/web"})),
            step_with(json!({"items": [1, 2, 3]})),
            step_with(json!({"replicas": 3})),
        ];
        assert_eq!(estimate_targets(&steps), 5);
    }

    // =========================================================================
    // ENFORCEMENT
    // =========================================================================

    #[test]
    fn default_ceiling_applies_without_constraints() {
        let targets: Vec<String> = (0..51).map(|i| format!("pod-{}", i)).collect();
        let steps = vec![step_with(json!({ "targets": targets }))];

        let err = enforce_constraints(&prod(), None, &steps, at(12, 0), ActionKind::Write)
            .unwrap_err();
        assert_eq!(err.kind, ConstraintViolationKind::MaxTargetsExceeded);

        // Read actions are unconstrained.
        assert!(enforce_constraints(&prod(), None, &steps, at(12, 0), ActionKind::Read).is_ok());

        let fifty: Vec<String> = (0..50).map(|i| format!("pod-{}", i)).collect();
        let steps = vec![step_with(json!({ "targets": fifty }))];
        assert!(enforce_constraints(&prod(), None, &steps, at(12, 0), ActionKind::Write).is_ok());
    }

    #[test]
    fn environment_must_be_allowed() {
        let c = constraints(json!({"allowed_envs": ["Staging", "DEV"]}));
        let err = enforce_constraints(&prod(), Some(&c), &[], at(12, 0), ActionKind::Read)
            .unwrap_err();
        assert_eq!(err.kind, ConstraintViolationKind::EnvironmentNotAllowed);
        assert!(err.to_string().starts_with("constraints violated:"));

        let staging = ContextRef::new("acme", "staging");
        assert!(enforce_constraints(&staging, Some(&c), &[], at(12, 0), ActionKind::Write).is_ok());
    }

    #[test]
    fn environments_key_and_comma_list_are_accepted() {
        let c = constraints(json!({"environments": "dev, prod"}));
        assert!(enforce_constraints(&prod(), Some(&c), &[], at(12, 0), ActionKind::Write).is_ok());

        let empty = constraints(json!({"allowed_envs": []}));
        assert!(enforce_constraints(&prod(), Some(&empty), &[], at(12, 0), ActionKind::Write).is_ok());
    }

    #[test]
    fn window_wrapping_midnight() {
        let c = constraints(json!({"maintenance_window": {"start": "23:00", "end": "02:00"}}));
        assert!(enforce_constraints(&prod(), Some(&c), &[], at(1, 0), ActionKind::Write).is_ok());
        assert!(enforce_constraints(&prod(), Some(&c), &[], at(23, 30), ActionKind::Write).is_ok());
        assert!(enforce_constraints(&prod(), Some(&c), &[], at(2, 0), ActionKind::Write).is_ok());

        let err = enforce_constraints(&prod(), Some(&c), &[], at(12, 0), ActionKind::Write)
            .unwrap_err();
        assert_eq!(err.kind, ConstraintViolationKind::OutsideMaintenanceWindow);
    }

    #[test]
    fn window_end_includes_its_last_minute() {
        let c = constraints(json!({"maintenance_window": {"start": "01:00", "end": "02:00"}}));
        let inside = Utc.with_ymd_and_hms(2026, 1, 15, 2, 0, 59).unwrap();
        assert!(enforce_constraints(&prod(), Some(&c), &[], inside, ActionKind::Write).is_ok());
        assert!(enforce_constraints(&prod(), Some(&c), &[], at(2, 1), ActionKind::Write).is_err());

        let precise = constraints(json!({"maintenance_window": {"start": "01:00", "end": "02:00:30"}}));
        let after = Utc.with_ymd_and_hms(2026, 1, 15, 2, 0, 31).unwrap();
        assert!(enforce_constraints(&prod(), Some(&precise), &[], after, ActionKind::Write).is_err());
    }

    #[test]
    fn window_only_gates_writes() {
        let c = constraints(json!({"maintenance_window": {"start": "01:00", "end": "03:00"}}));
        assert!(enforce_constraints(&prod(), Some(&c), &[], at(12, 0), ActionKind::Read).is_ok());
        assert!(enforce_constraints(&prod(), Some(&c), &[], at(12, 0), ActionKind::Write).is_err());
    }

    #[test]
    fn window_respects_timezone() {
        let c = constraints(json!({
            "maintenance_window": {"start": "09:00", "end": "17:00", "timezone": "America/New_York"}
        }));
        // 15:00 UTC is 10:00 EST
        assert!(enforce_constraints(&prod(), Some(&c), &[], at(15, 0), ActionKind::Write).is_ok());
        // 23:00 UTC is 18:00 EST
        assert!(enforce_constraints(&prod(), Some(&c), &[], at(23, 0), ActionKind::Write).is_err());
    }

    #[test]
    fn invalid_timezone_falls_back_to_utc() {
        let c = constraints(json!({
            "maintenance_window": {"start": "09:00", "end": "17:00", "tz": "Mars/Olympus"}
        }));
        assert!(enforce_constraints(&prod(), Some(&c), &[], at(10, 0), ActionKind::Write).is_ok());
        assert!(enforce_constraints(&prod(), Some(&c), &[], at(18, 0), ActionKind::Write).is_err());
    }

    #[test]
    fn malformed_window_is_no_restriction_by_default() {
        for window in [
            json!({"start": "23:00"}),
            json!({"start": "25:99", "end": "02:00"}),
            json!("23:00-02:00"),
        ] {
            let c = constraints(json!({ "maintenance_window": window }));
            assert!(
                enforce_constraints(&prod(), Some(&c), &[], at(12, 0), ActionKind::Write).is_ok()
            );
        }
    }

    #[test]
    fn strict_engine_rejects_malformed_window() {
        let engine = ConstraintEngine::new(&ConstraintsConfig {
            default_max_targets: 50,
            strict_windows: true,
        });
        let c = constraints(json!({"maintenance_window": {"start": "23:00"}}));
        let err = engine
            .enforce(&prod(), Some(&c), &[], at(12, 0), ActionKind::Write)
            .unwrap_err();
        assert_eq!(err.kind, ConstraintViolationKind::MalformedWindow);
    }

    #[test]
    fn explicit_max_targets() {
        let c = constraints(json!({"max_targets": 2}));
        let steps = vec![step_with(json!({"targets": ["a", "b", "c"]}))];
        let err = enforce_constraints(&prod(), Some(&c), &steps, at(12, 0), ActionKind::Write)
            .unwrap_err();
        assert_eq!(err.kind, ConstraintViolationKind::MaxTargetsExceeded);

        // Zero means "use the default".
        let zero = constraints(json!({"max_targets": 0}));
        assert!(enforce_constraints(&prod(), Some(&zero), &steps, at(12, 0), ActionKind::Write).is_ok());

        let as_string = constraints(json!({"max_targets": "3"}));
        assert!(
            enforce_constraints(&prod(), Some(&as_string), &steps, at(12, 0), ActionKind::Write)
                .is_ok()
        );
    }

    #[test]
    fn configured_default_ceiling() {
        let engine = ConstraintEngine::new(&ConstraintsConfig {
            default_max_targets: 2,
            strict_windows: false,
        });
        let steps = vec![step_with(json!({"targets": ["a", "b", "c"]}))];
        assert!(engine
            .enforce(&prod(), None, &steps, at(12, 0), ActionKind::Write)
            .is_err());
    }

    // =========================================================================
    // DIAGNOSTIC HINTS
    // =========================================================================

    #[test]
    fn hints_round_trip_through_constraints() {
        let c = constraints(json!({
            "diagnostic_hints": {"promql": ["up"], "trace_ids": ["abc"]}
        }));
        let mut hints = DiagnosticHints::from_constraints(Some(&c));
        assert_eq!(hints.promql, vec!["up".to_string()]);

        hints.extend(DiagnosticHints {
            promql: vec!["up".to_string(), "rate(errors[5m])".to_string()],
            traceql: vec!["{ status = error }".to_string()],
            trace_ids: vec![],
        });
        assert_eq!(hints.promql.len(), 2);

        let updated = hints.apply_to(Some(c)).unwrap();
        let back = DiagnosticHints::from_constraints(Some(&updated));
        assert_eq!(back, hints);
    }

    #[test]
    fn empty_hints_leave_constraints_untouched() {
        assert_eq!(DiagnosticHints::default().apply_to(None), None);
    }
}
