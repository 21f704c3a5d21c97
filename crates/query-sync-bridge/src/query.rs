//! Query identities and invalidation scopes.

use std::fmt;

/// Group of cached queries invalidated together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Projects,
    Tasks,
    Sessions,
    Events,
    Analytics,
    Dashboard,
}

impl Scope {
    /// Scopes made stale by a message on `channel`.
    ///
    /// Every domain channel also touches the dashboard, which aggregates
    /// all of them. Unknown channels map to nothing.
    pub fn for_channel(channel: &str) -> &'static [Scope] {
        match channel {
            "project" => &[Scope::Projects, Scope::Dashboard],
            "task" => &[Scope::Tasks, Scope::Dashboard],
            "session" => &[Scope::Sessions, Scope::Dashboard],
            "event" => &[Scope::Events, Scope::Dashboard],
            "stats" => &[Scope::Analytics, Scope::Dashboard],
            _ => &[],
        }
    }
}

/// A control-plane read whose result is cached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    Projects,
    Project(i64),
    Tasks { project_id: Option<i64> },
    Sessions,
    Activities,
    DashboardOverview,
    Trends { days: u32 },
    AgentStats { days: u32 },
}

impl Query {
    pub fn scope(&self) -> Scope {
        match self {
            Query::Projects | Query::Project(_) => Scope::Projects,
            Query::Tasks { .. } => Scope::Tasks,
            Query::Sessions => Scope::Sessions,
            Query::Activities => Scope::Events,
            Query::DashboardOverview => Scope::Dashboard,
            Query::Trends { .. } | Query::AgentStats { .. } => Scope::Analytics,
        }
    }

    /// REST path, relative to the control-plane base URL.
    pub fn path(&self) -> String {
        match self {
            Query::Projects => "/api/projects".to_string(),
            Query::Project(id) => format!("/api/projects/{}", id),
            Query::Tasks { project_id: None } => "/api/tasks".to_string(),
            Query::Tasks {
                project_id: Some(id),
            } => format!("/api/tasks?project_id={}", id),
            Query::Sessions => "/api/sessions".to_string(),
            Query::Activities => "/api/dashboard/activities".to_string(),
            Query::DashboardOverview => "/api/dashboard/overview".to_string(),
            Query::Trends { days } => format!("/api/dashboard/trends?days={}", days),
            Query::AgentStats { days } => format!("/api/dashboard/agent-stats?days={}", days),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_scopes() {
        assert_eq!(
            Scope::for_channel("task"),
            &[Scope::Tasks, Scope::Dashboard]
        );
        assert_eq!(
            Scope::for_channel("stats"),
            &[Scope::Analytics, Scope::Dashboard]
        );
        assert!(Scope::for_channel("milestone").is_empty());
        assert!(Scope::for_channel("*").is_empty());
    }

    #[test]
    fn test_every_channel_touches_dashboard() {
        for channel in ["project", "task", "session", "event", "stats"] {
            assert!(Scope::for_channel(channel).contains(&Scope::Dashboard));
        }
    }

    #[test]
    fn test_query_paths() {
        assert_eq!(Query::Projects.path(), "/api/projects");
        assert_eq!(Query::Project(7).path(), "/api/projects/7");
        assert_eq!(
            Query::Tasks { project_id: Some(7) }.path(),
            "/api/tasks?project_id=7"
        );
        assert_eq!(Query::Tasks { project_id: None }.path(), "/api/tasks");
        assert_eq!(
            Query::Trends { days: 30 }.path(),
            "/api/dashboard/trends?days=30"
        );
        assert_eq!(
            Query::AgentStats { days: 7 }.to_string(),
            "/api/dashboard/agent-stats?days=7"
        );
    }

    #[test]
    fn test_query_scopes() {
        assert_eq!(Query::Project(1).scope(), Scope::Projects);
        assert_eq!(Query::Tasks { project_id: Some(1) }.scope(), Scope::Tasks);
        assert_eq!(Query::Activities.scope(), Scope::Events);
        assert_eq!(Query::DashboardOverview.scope(), Scope::Dashboard);
        assert_eq!(Query::Trends { days: 30 }.scope(), Scope::Analytics);
    }
}
