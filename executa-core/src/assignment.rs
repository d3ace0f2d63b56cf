//! Human agent selection for internally routed handoffs.

use crate::models::HumanAgent;
use crate::settings::AssignmentMethod;

/// An agent together with the number of chats it is currently handling.
#[derive(Debug, Clone)]
pub struct AgentLoad {
    pub agent: HumanAgent,
    pub load: i64,
}

impl AgentLoad {
    pub fn new(agent: HumanAgent, load: i64) -> Self {
        Self { agent, load }
    }

    pub fn has_capacity(&self) -> bool {
        self.load < i64::from(self.agent.max_chats)
    }

    fn skill_score(&self, required: &[String]) -> usize {
        required
            .iter()
            .filter(|skill| self.agent.has_skill(skill))
            .count()
    }
}

/// Picks an agent, or `None` when nobody has spare capacity.
pub fn pick<'a>(
    method: AssignmentMethod,
    candidates: &'a [AgentLoad],
    required_skills: &[String],
) -> Option<&'a AgentLoad> {
    let available: Vec<&AgentLoad> = candidates.iter().filter(|c| c.has_capacity()).collect();

    match method {
        AssignmentMethod::LeastBusy => least_busy(&available),
        AssignmentMethod::RoundRobin => round_robin(&available),
        AssignmentMethod::SkillsBased => skills_based(&available, required_skills),
    }
}

fn least_busy<'a>(available: &[&'a AgentLoad]) -> Option<&'a AgentLoad> {
    available.iter().copied().min_by_key(|c| c.load)
}

// Never-assigned agents sort first because `None < Some(_)`.
fn round_robin<'a>(available: &[&'a AgentLoad]) -> Option<&'a AgentLoad> {
    available
        .iter()
        .copied()
        .min_by_key(|c| c.agent.last_assigned_at)
}

fn skills_based<'a>(available: &[&'a AgentLoad], required: &[String]) -> Option<&'a AgentLoad> {
    let best = available
        .iter()
        .map(|c| c.skill_score(required))
        .max()
        .unwrap_or(0);

    if best == 0 {
        return round_robin(available);
    }

    let ranked: Vec<&AgentLoad> = available
        .iter()
        .copied()
        .filter(|c| c.skill_score(required) == best)
        .collect();
    round_robin(&ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn agent(name: &str, max_chats: i32) -> HumanAgent {
        let mut agent = HumanAgent::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            name,
            format!("{}@example.com", name),
        );
        agent.max_chats = max_chats;
        agent.is_online = true;
        agent
    }

    fn names(picked: Option<&AgentLoad>) -> Option<&str> {
        picked.map(|c| c.agent.name.as_str())
    }

    #[test]
    fn test_least_busy_selects_minimum_load() {
        let candidates = vec![
            AgentLoad::new(agent("a", 4), 3),
            AgentLoad::new(agent("b", 4), 1),
            AgentLoad::new(agent("c", 4), 5),
        ];
        assert_eq!(
            names(pick(AssignmentMethod::LeastBusy, &candidates, &[])),
            Some("b")
        );
    }

    #[test]
    fn test_agent_at_capacity_is_excluded() {
        let candidates = vec![AgentLoad::new(agent("full", 4), 4)];
        assert!(pick(AssignmentMethod::LeastBusy, &candidates, &[]).is_none());
        assert!(pick(AssignmentMethod::RoundRobin, &candidates, &[]).is_none());
        assert!(pick(AssignmentMethod::SkillsBased, &candidates, &[]).is_none());
    }

    #[test]
    fn test_least_busy_tie_goes_to_first() {
        let candidates = vec![
            AgentLoad::new(agent("first", 5), 2),
            AgentLoad::new(agent("second", 5), 2),
        ];
        assert_eq!(
            names(pick(AssignmentMethod::LeastBusy, &candidates, &[])),
            Some("first")
        );
    }

    #[test]
    fn test_empty_candidates() {
        assert!(pick(AssignmentMethod::LeastBusy, &[], &[]).is_none());
    }

    #[test]
    fn test_round_robin_prefers_never_assigned_then_oldest() {
        let now = Utc::now();
        let mut recent = agent("recent", 5);
        recent.last_assigned_at = Some(now - Duration::minutes(1));
        let mut older = agent("older", 5);
        older.last_assigned_at = Some(now - Duration::hours(2));
        let fresh = agent("fresh", 5);

        let candidates = vec![
            AgentLoad::new(recent.clone(), 0),
            AgentLoad::new(older.clone(), 3),
            AgentLoad::new(fresh, 4),
        ];
        assert_eq!(
            names(pick(AssignmentMethod::RoundRobin, &candidates, &[])),
            Some("fresh")
        );

        let candidates = vec![AgentLoad::new(recent, 0), AgentLoad::new(older, 3)];
        assert_eq!(
            names(pick(AssignmentMethod::RoundRobin, &candidates, &[])),
            Some("older")
        );
    }

    #[test]
    fn test_round_robin_rotates_as_cursor_advances() {
        let mut agents: Vec<AgentLoad> = ["a", "b", "c"]
            .iter()
            .map(|n| AgentLoad::new(agent(n, 5), 0))
            .collect();

        let mut order = Vec::new();
        for step in 0..4 {
            let picked = pick(AssignmentMethod::RoundRobin, &agents, &[])
                .map(|c| c.agent.id)
                .unwrap();
            let slot = agents.iter_mut().find(|c| c.agent.id == picked).unwrap();
            slot.agent.last_assigned_at = Some(Utc::now() + Duration::seconds(step));
            order.push(slot.agent.name.clone());
        }
        assert_eq!(order, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_skills_based_ranks_by_matches() {
        let mut billing = agent("billing", 5);
        billing.skills = vec!["Billing".into()];
        let mut both = agent("both", 5);
        both.skills = vec!["billing".into(), "refunds".into()];
        let none = agent("none", 5);

        let candidates = vec![
            AgentLoad::new(none, 0),
            AgentLoad::new(billing, 0),
            AgentLoad::new(both, 2),
        ];
        let required = vec!["billing".to_string(), "REFUNDS".to_string()];
        assert_eq!(
            names(pick(AssignmentMethod::SkillsBased, &candidates, &required)),
            Some("both")
        );
    }

    #[test]
    fn test_skills_based_falls_back_to_round_robin() {
        let mut seasoned = agent("seasoned", 5);
        seasoned.last_assigned_at = Some(Utc::now());
        let idle = agent("idle", 5);

        let candidates = vec![AgentLoad::new(seasoned, 0), AgentLoad::new(idle, 0)];
        let required = vec!["japanese".to_string()];

        assert_eq!(
            names(pick(AssignmentMethod::SkillsBased, &candidates, &required)),
            Some("idle")
        );
        assert_eq!(
            names(pick(AssignmentMethod::SkillsBased, &candidates, &[])),
            Some("idle")
        );
    }
}
