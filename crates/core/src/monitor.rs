use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default)]
struct ToolCounters {
    executions: u64,
    successes: u64,
    failures: u64,
    total_time: f64,
    last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct MonitorState {
    tools: BTreeMap<String, ToolCounters>,
    daily: BTreeMap<NaiveDate, BTreeMap<String, u64>>,
    users: BTreeMap<String, BTreeMap<String, u64>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolStats {
    pub tool_name: String,
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    /// Percentage in `0.0..=100.0`.
    pub success_rate: f64,
    /// Seconds.
    pub total_time: f64,
    /// Seconds.
    pub avg_time: f64,
    pub last_used: Option<DateTime<Utc>>,
}

impl ToolStats {
    fn from_counters(tool_name: &str, counters: &ToolCounters) -> Self {
        let (success_rate, avg_time) = if counters.executions == 0 {
            (0.0, 0.0)
        } else {
            let executions = counters.executions as f64;
            (counters.successes as f64 / executions * 100.0, counters.total_time / executions)
        };
        Self {
            tool_name: tool_name.to_owned(),
            executions: counters.executions,
            successes: counters.successes,
            failures: counters.failures,
            success_rate,
            total_time: counters.total_time,
            avg_time,
            last_used: counters.last_used,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCount {
    pub tool_name: String,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: String,
    pub total_executions: u64,
    pub tools_used: usize,
    pub top_tools: Vec<ToolCount>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total_executions: u64,
    pub tools_used: usize,
    pub top_tools: Vec<ToolCount>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub total_tools: usize,
    pub total_executions: u64,
    /// Weighted by execution volume.
    pub avg_success_rate: f64,
    /// Unweighted mean of per-tool averages.
    pub avg_execution_time: f64,
    pub slowest_tools: Vec<ToolStats>,
    pub fastest_tools: Vec<ToolStats>,
    pub most_used_tools: Vec<ToolStats>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitorExport {
    pub tools: Vec<ToolStats>,
    pub performance: PerformanceReport,
    pub daily: Vec<DailyStats>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    SlowExecution,
    LowSuccessRate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub severity: AlertSeverity,
    pub kind: AlertKind,
    pub tool_name: String,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub slow_execution_secs: f64,
    pub very_slow_execution_secs: f64,
    pub min_success_rate_pct: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self { slow_execution_secs: 5.0, very_slow_execution_secs: 10.0, min_success_rate_pct: 80.0 }
    }
}

const USER_TOP_TOOLS: usize = 5;
const DAILY_TOP_TOOLS: usize = 3;
const REPORT_TOP_TOOLS: usize = 5;
pub const DEFAULT_DAILY_WINDOW: u32 = 7;
const EXPORT_DAILY_WINDOW: u32 = 30;

/// Process-wide tool usage aggregates. Every `record` updates all counters
/// under a single lock, so concurrent recorders never lose increments.
#[derive(Debug, Default)]
pub struct UsageMonitor {
    state: Mutex<MonitorState>,
}

impl UsageMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn record(&self, tool_name: &str, user_id: &str, success: bool, duration: Duration) {
        self.record_at(tool_name, user_id, success, duration, Utc::now());
    }

    pub fn record_at(
        &self,
        tool_name: &str,
        user_id: &str,
        success: bool,
        duration: Duration,
        at: DateTime<Utc>,
    ) {
        let mut state = self.lock();

        let counters = state.tools.entry(tool_name.to_owned()).or_default();
        counters.executions += 1;
        if success {
            counters.successes += 1;
        } else {
            counters.failures += 1;
        }
        counters.total_time += duration.as_secs_f64();
        counters.last_used = Some(at);

        *state
            .daily
            .entry(at.date_naive())
            .or_default()
            .entry(tool_name.to_owned())
            .or_default() += 1;
        *state.users.entry(user_id.to_owned()).or_default().entry(tool_name.to_owned()).or_default() +=
            1;
    }

    pub fn tool_stats(&self, tool_name: &str) -> ToolStats {
        let state = self.lock();
        let empty = ToolCounters::default();
        ToolStats::from_counters(tool_name, state.tools.get(tool_name).unwrap_or(&empty))
    }

    /// Sorted by execution volume, busiest first.
    pub fn all_tool_stats(&self) -> Vec<ToolStats> {
        let state = self.lock();
        let mut stats: Vec<ToolStats> = state
            .tools
            .iter()
            .map(|(name, counters)| ToolStats::from_counters(name, counters))
            .collect();
        stats.sort_by(|a, b| b.executions.cmp(&a.executions));
        stats
    }

    pub fn top_tools(&self, limit: usize) -> Vec<ToolStats> {
        let mut stats = self.all_tool_stats();
        stats.truncate(limit);
        stats
    }

    pub fn user_stats(&self, user_id: &str) -> UserStats {
        let state = self.lock();
        let empty = BTreeMap::new();
        let tools = state.users.get(user_id).unwrap_or(&empty);
        UserStats {
            user_id: user_id.to_owned(),
            total_executions: tools.values().sum(),
            tools_used: tools.len(),
            top_tools: ranked(tools, USER_TOP_TOOLS),
        }
    }

    pub fn daily_stats(&self, days: u32) -> Vec<DailyStats> {
        self.daily_stats_from(Utc::now().date_naive(), days)
    }

    /// One entry per day, newest first, starting at `today`.
    pub fn daily_stats_from(&self, today: NaiveDate, days: u32) -> Vec<DailyStats> {
        let state = self.lock();
        let empty = BTreeMap::new();
        (0..days)
            .filter_map(|offset| today.checked_sub_days(Days::new(u64::from(offset))))
            .map(|date| {
                let tools = state.daily.get(&date).unwrap_or(&empty);
                DailyStats {
                    date,
                    total_executions: tools.values().sum(),
                    tools_used: tools.len(),
                    top_tools: ranked(tools, DAILY_TOP_TOOLS),
                }
            })
            .collect()
    }

    pub fn performance_report(&self) -> PerformanceReport {
        let all = self.all_tool_stats();
        if all.is_empty() {
            return PerformanceReport::default();
        }

        let total_executions: u64 = all.iter().map(|s| s.executions).sum();
        let avg_success_rate = if total_executions == 0 {
            0.0
        } else {
            all.iter().map(|s| s.success_rate * s.executions as f64).sum::<f64>()
                / total_executions as f64
        };
        let avg_execution_time = all.iter().map(|s| s.avg_time).sum::<f64>() / all.len() as f64;

        let mut by_latency = all.clone();
        by_latency.sort_by(|a, b| a.avg_time.total_cmp(&b.avg_time));
        let fastest_tools: Vec<ToolStats> =
            by_latency.iter().take(REPORT_TOP_TOOLS).cloned().collect();
        let slowest_tools: Vec<ToolStats> =
            by_latency.iter().rev().take(REPORT_TOP_TOOLS).cloned().collect();

        PerformanceReport {
            total_tools: all.len(),
            total_executions,
            avg_success_rate,
            avg_execution_time,
            slowest_tools,
            fastest_tools,
            most_used_tools: all.into_iter().take(REPORT_TOP_TOOLS).collect(),
        }
    }

    /// Evaluated against current aggregates; nothing is streamed.
    pub fn alerts(&self, thresholds: &AlertThresholds) -> Vec<PerformanceAlert> {
        let mut alerts = Vec::new();
        for stats in self.all_tool_stats() {
            if stats.avg_time > thresholds.very_slow_execution_secs {
                alerts.push(PerformanceAlert {
                    severity: AlertSeverity::Critical,
                    kind: AlertKind::SlowExecution,
                    message: format!("tool `{}` average execution time is too long", stats.tool_name),
                    tool_name: stats.tool_name.clone(),
                    value: stats.avg_time,
                    threshold: thresholds.very_slow_execution_secs,
                });
            } else if stats.avg_time > thresholds.slow_execution_secs {
                alerts.push(PerformanceAlert {
                    severity: AlertSeverity::Warning,
                    kind: AlertKind::SlowExecution,
                    message: format!("tool `{}` execution time is elevated", stats.tool_name),
                    tool_name: stats.tool_name.clone(),
                    value: stats.avg_time,
                    threshold: thresholds.slow_execution_secs,
                });
            }

            if stats.success_rate < thresholds.min_success_rate_pct {
                alerts.push(PerformanceAlert {
                    severity: AlertSeverity::Warning,
                    kind: AlertKind::LowSuccessRate,
                    message: format!("tool `{}` success rate is low", stats.tool_name),
                    tool_name: stats.tool_name.clone(),
                    value: stats.success_rate,
                    threshold: thresholds.min_success_rate_pct,
                });
            }
        }
        alerts
    }

    /// Clears one tool's counters, or everything when `tool_name` is `None`.
    /// Per-day and per-user breakdowns are only reset by a full clear.
    pub fn clear(&self, tool_name: Option<&str>) {
        let mut state = self.lock();
        match tool_name {
            Some(name) => {
                state.tools.remove(name);
            }
            None => *state = MonitorState::default(),
        }
    }

    pub fn export(&self) -> MonitorExport {
        MonitorExport {
            tools: self.all_tool_stats(),
            performance: self.performance_report(),
            daily: self.daily_stats(EXPORT_DAILY_WINDOW),
        }
    }

    /// Starts a scoped measurement. The returned guard records exactly once.
    pub fn start<'a>(&'a self, tool_name: &str, user_id: &str) -> ExecutionTimer<'a> {
        ExecutionTimer {
            monitor: self,
            tool_name: tool_name.to_owned(),
            user_id: user_id.to_owned(),
            started: Instant::now(),
            recorded: false,
        }
    }

    /// Times `work`, recording success iff it resolves to `Ok`.
    pub async fn measure<T, E, F>(&self, tool_name: &str, user_id: &str, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let timer = self.start(tool_name, user_id);
        let outcome = work.await;
        timer.finish(outcome.is_ok());
        outcome
    }
}

fn ranked(tools: &BTreeMap<String, u64>, limit: usize) -> Vec<ToolCount> {
    let mut counts: Vec<ToolCount> = tools
        .iter()
        .map(|(tool_name, count)| ToolCount { tool_name: tool_name.clone(), count: *count })
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts.truncate(limit);
    counts
}

/// Drop guard around one tool invocation. Dropping it without calling
/// [`ExecutionTimer::succeed`] or [`ExecutionTimer::fail`] records a failure.
#[must_use = "dropping the timer immediately records a failed execution"]
pub struct ExecutionTimer<'a> {
    monitor: &'a UsageMonitor,
    tool_name: String,
    user_id: String,
    started: Instant,
    recorded: bool,
}

impl ExecutionTimer<'_> {
    pub fn succeed(self) {
        self.finish(true);
    }

    pub fn fail(self) {
        self.finish(false);
    }

    pub fn finish(mut self, success: bool) {
        self.record(success);
    }

    fn record(&mut self, success: bool) {
        if self.recorded {
            return;
        }
        self.recorded = true;
        self.monitor.record(&self.tool_name, &self.user_id, success, self.started.elapsed());
    }
}

impl Drop for ExecutionTimer<'_> {
    fn drop(&mut self) {
        self.record(false);
    }
}
