//! "Hall of Fame": ranked view over the registry, JSON and markdown.

use serde::Serialize;

use crate::registry::Versioned;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub name: String,
    pub specialization: String,
    pub performance_score: f64,
    pub completed: usize,
    pub successes: usize,
    pub eliminated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HallOfFame {
    pub entries: Vec<LeaderboardEntry>,
    /// Eliminated agents, kept for the record.
    pub eliminated: Vec<LeaderboardEntry>,
}

impl HallOfFame {
    /// Score desc, completed desc, name asc. Agents without any completed
    /// mission are not ranked.
    pub fn build(agents: &[Versioned], size: usize) -> Self {
        let mut rows: Vec<LeaderboardEntry> = agents
            .iter()
            .filter(|a| !a.profile.history.is_empty())
            .map(|a| LeaderboardEntry {
                rank: 0,
                name: a.profile.name.clone(),
                specialization: a.profile.specialization.clone(),
                performance_score: a.profile.performance_score,
                completed: a.profile.history.len(),
                successes: a.profile.successes(),
                eliminated: a.eliminated,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.performance_score
                .total_cmp(&a.performance_score)
                .then_with(|| b.completed.cmp(&a.completed))
                .then_with(|| a.name.cmp(&b.name))
        });

        let (mut entries, mut eliminated): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|r| !r.eliminated);
        entries.truncate(size);
        for (i, e) in entries.iter_mut().enumerate() {
            e.rank = i + 1;
        }
        for e in eliminated.iter_mut() {
            e.rank = 0;
        }
        Self {
            entries,
            eliminated,
        }
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# Hall of Fame\n\n");
        if self.entries.is_empty() {
            out.push_str("_No completed missions yet._\n");
        } else {
            out.push_str("| # | Agent | Specialization | Score | Missions | Successes |\n");
            out.push_str("|---|-------|----------------|-------|----------|-----------|\n");
            for e in &self.entries {
                out.push_str(&format!(
                    "| {} | {} | {} | {:.1} | {} | {} |\n",
                    e.rank,
                    e.name,
                    e.specialization,
                    e.performance_score,
                    e.completed,
                    e.successes
                ));
            }
        }
        if !self.eliminated.is_empty() {
            out.push_str("\n## Eliminated\n\n");
            for e in &self.eliminated {
                out.push_str(&format!(
                    "- {} ({:.1} over {} missions)\n",
                    e.name, e.performance_score, e.completed
                ));
            }
        }
        out
    }
}
