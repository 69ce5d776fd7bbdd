//! Finish-time collection and ranking
//!
//! The aggregator keeps the first report per participant, in arrival order.
//! Ranking is a stable ascending sort on elapsed time, so equal times keep
//! the order in which they were reported. Once published the table is frozen
//! until the aggregator is cleared for the next session.

use log::{debug, info};
use shared::RankingEntry;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub struct FinishReport {
    pub player_id: u32,
    /// Name at report time, so departed finishers still rank
    pub name: String,
    pub elapsed_time: f32,
}

#[derive(Debug, Default)]
pub struct ResultAggregator {
    reports: Vec<FinishReport>,
    published: Option<Vec<RankingEntry>>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a finish report. Returns false for duplicates, invalid times,
    /// or reports arriving after publication.
    pub fn report(&mut self, player_id: u32, name: &str, elapsed_time: f32) -> bool {
        if self.published.is_some() {
            debug!("Results already published, ignoring report from {}", player_id);
            return false;
        }
        if !elapsed_time.is_finite() || elapsed_time < 0.0 {
            debug!("Ignoring invalid finish time {} from {}", elapsed_time, player_id);
            return false;
        }
        if self.has_reported(player_id) {
            debug!("Duplicate finish report from {}", player_id);
            return false;
        }

        info!("Player {} ({}) finished in {:.3}s", player_id, name, elapsed_time);
        self.reports.push(FinishReport {
            player_id,
            name: name.to_string(),
            elapsed_time,
        });
        true
    }

    pub fn has_reported(&self, player_id: u32) -> bool {
        self.reports.iter().any(|r| r.player_id == player_id)
    }

    pub fn report_for(&self, player_id: u32) -> Option<&FinishReport> {
        self.reports.iter().find(|r| r.player_id == player_id)
    }

    /// True once every listed participant has a report.
    pub fn covers(&self, participants: &[u32]) -> bool {
        participants.iter().all(|id| self.has_reported(*id))
    }

    /// Freezes and returns the ranking. Yields `None` if it was already
    /// published, so callers broadcast exactly once.
    pub fn publish(&mut self) -> Option<Vec<RankingEntry>> {
        if self.published.is_some() {
            return None;
        }
        let ranking = rank(&self.reports);
        self.published = Some(ranking.clone());
        Some(ranking)
    }

    pub fn ranking(&self) -> Option<&[RankingEntry]> {
        self.published.as_deref()
    }

    pub fn is_published(&self) -> bool {
        self.published.is_some()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    pub fn clear(&mut self) {
        self.reports.clear();
        self.published = None;
    }
}

/// Stable ascending sort by elapsed time with 1-based positions.
pub fn rank(reports: &[FinishReport]) -> Vec<RankingEntry> {
    let mut ordered: Vec<&FinishReport> = reports.iter().collect();
    ordered.sort_by(|a, b| {
        a.elapsed_time
            .partial_cmp(&b.elapsed_time)
            .unwrap_or(Ordering::Equal)
    });

    ordered
        .into_iter()
        .enumerate()
        .map(|(index, report)| RankingEntry {
            position: index as u32 + 1,
            player_id: report.player_id,
            name: report.name.clone(),
            elapsed_time: report.elapsed_time,
        })
        .collect()
}
