use chrono::Duration;

/// Emergency dispatch and reminder policy. These are tunables, not
/// contract: deployments override them via `LIFELINE_*` environment
/// variables (see lifeline-server).
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// First search radius for emergency doctor matching.
    pub initial_radius_km: f64,
    /// Radius multiplier applied on each escalation.
    pub escalation_factor: f64,
    /// Total number of searches, the first attempt included.
    pub max_attempts: u32,
    /// Escalate until at least this many recipients are found.
    pub min_recipients: usize,
    /// Reminders fire this long before the appointment.
    pub reminder_lead: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            initial_radius_km: 10.0,
            escalation_factor: 2.0,
            max_attempts: 3,
            min_recipients: 3,
            reminder_lead: Duration::hours(24),
        }
    }
}
