//! Recorded exercise and quiz results plus XP and streak bookkeeping.
//!
//! Results are append-mostly: attempts keep counting, but once an id has a
//! recorded pass no later failure takes it away.

use crate::env;
use crate::error::{EngineError, IoContext, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// XP for a first pass when the course sets no override.
pub const DEFAULT_EXERCISE_XP: u32 = 20;
/// Bonus XP for passing a quiz.
pub const QUIZ_PASS_BONUS_XP: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseResult {
    pub status: ResultStatus,
    pub attempts: u32,
    pub xp_earned: u32,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizResult {
    pub passed: bool,
    /// Percentage, 0..=100
    pub score: u32,
    pub total_questions: u32,
    pub xp_earned: u32,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_xp: u64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_active_date: Option<NaiveDate>,
    pub total_exercises: u32,
}

impl Stats {
    fn touch(&mut self, today: NaiveDate) {
        match self.last_active_date {
            Some(last) if last == today => return,
            Some(last) if last.succ_opt() == Some(today) => self.current_streak += 1,
            _ => self.current_streak = 1,
        }
        self.last_active_date = Some(today);
        self.longest_streak = self.longest_streak.max(self.current_streak);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(default)]
    pub stats: Stats,
    #[serde(default)]
    pub exercises: BTreeMap<String, ExerciseResult>,
    #[serde(default)]
    pub quizzes: BTreeMap<String, QuizResult>,
    #[serde(default)]
    pub achievements: Vec<String>,
}

/// What a single recording changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    pub first_pass: bool,
    pub xp_awarded: u32,
}

impl Progress {
    /// Load the workspace's progress, or an empty record when none exists yet.
    pub fn load(workspace: &Path) -> Result<Self> {
        let path = env::progress_file_path(workspace);
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path).at(&path)?;
        serde_json::from_str(&text)
            .map_err(|e| EngineError::Progress(format!("{}: {}", path.display(), e)))
    }

    /// Write through a temp file in the state directory, then rename.
    pub fn save(&self, workspace: &Path) -> Result<()> {
        let dir = env::state_dir_path(workspace);
        fs::create_dir_all(&dir).at(&dir)?;
        let path = env::progress_file_path(workspace);
        let body = serde_json::to_vec_pretty(self)
            .map_err(|e| EngineError::Progress(e.to_string()))?;

        let mut staged = tempfile::NamedTempFile::new_in(&dir).at(&dir)?;
        staged.write_all(&body).at(staged.path())?;
        staged
            .persist(&path)
            .map_err(|e| EngineError::io(&path, e.error))?;
        debug!("Saved progress to {:?}", path);
        Ok(())
    }

    pub fn exercise_passed(&self, id: &str) -> bool {
        self.exercises
            .get(id)
            .is_some_and(|r| r.status == ResultStatus::Pass)
    }

    pub fn quiz_passed(&self, id: &str) -> bool {
        self.quizzes.get(id).is_some_and(|q| q.passed)
    }

    pub fn record_exercise(
        &mut self,
        id: &str,
        passed: bool,
        xp: u32,
        now: DateTime<Utc>,
    ) -> RecordOutcome {
        let entry = self
            .exercises
            .entry(id.to_string())
            .or_insert_with(|| ExerciseResult {
                status: ResultStatus::Fail,
                attempts: 0,
                xp_earned: 0,
                completed_at: None,
            });
        entry.attempts += 1;

        if !passed || entry.status == ResultStatus::Pass {
            return RecordOutcome {
                first_pass: false,
                xp_awarded: 0,
            };
        }

        entry.status = ResultStatus::Pass;
        entry.xp_earned = xp;
        entry.completed_at = Some(now);
        self.stats.total_xp += u64::from(xp);
        self.stats.total_exercises += 1;
        self.stats.touch(now.date_naive());
        info!("Exercise {} passed, +{} XP", id, xp);
        RecordOutcome {
            first_pass: true,
            xp_awarded: xp,
        }
    }

    /// Record a quiz attempt. The stored result only moves when the score improves.
    pub fn record_quiz(
        &mut self,
        id: &str,
        correct: u32,
        total: u32,
        passed: bool,
        now: DateTime<Utc>,
    ) -> RecordOutcome {
        let score = if total == 0 {
            0
        } else {
            ((f64::from(correct) / f64::from(total)) * 100.0).round() as u32
        };
        let xp = score / 5 + if passed { QUIZ_PASS_BONUS_XP } else { 0 };

        let previous = self
            .quizzes
            .get(id)
            .map(|q| (q.passed, q.score, q.xp_earned));
        let was_passed = previous.is_some_and(|(p, _, _)| p);
        let first_pass = passed && !was_passed;
        if let Some((_, old_score, _)) = previous
            && old_score >= score
        {
            if first_pass && let Some(q) = self.quizzes.get_mut(id) {
                q.passed = true;
            }
            return RecordOutcome {
                first_pass,
                xp_awarded: 0,
            };
        }

        let old_xp = previous.map(|(_, _, xp)| xp).unwrap_or(0);
        self.quizzes.insert(
            id.to_string(),
            QuizResult {
                passed: passed || was_passed,
                score,
                total_questions: total,
                xp_earned: xp,
                completed_at: Some(now),
            },
        );
        let gained = xp.saturating_sub(old_xp);
        self.stats.total_xp += u64::from(gained);
        self.stats.touch(now.date_naive());
        RecordOutcome {
            first_pass,
            xp_awarded: gained,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_pass_is_sticky() {
        let mut progress = Progress::default();
        let first = progress.record_exercise("m/a", true, 20, day(1));
        assert!(first.first_pass);
        let again = progress.record_exercise("m/a", false, 20, day(1));
        assert!(!again.first_pass);

        let result = &progress.exercises["m/a"];
        assert_eq!(result.status, ResultStatus::Pass);
        assert_eq!(result.attempts, 2);
        assert_eq!(progress.stats.total_xp, 20);
    }

    #[test]
    fn test_xp_only_once() {
        let mut progress = Progress::default();
        progress.record_exercise("m/a", false, 20, day(1));
        progress.record_exercise("m/a", true, 30, day(1));
        progress.record_exercise("m/a", true, 30, day(1));
        assert_eq!(progress.stats.total_xp, 30);
        assert_eq!(progress.stats.total_exercises, 1);
    }

    #[test]
    fn test_streaks() {
        let mut progress = Progress::default();
        progress.record_exercise("m/a", true, 1, day(1));
        progress.record_exercise("m/b", true, 1, day(2));
        progress.record_exercise("m/c", true, 1, day(2));
        assert_eq!(progress.stats.current_streak, 2);
        progress.record_exercise("m/d", true, 1, day(5));
        assert_eq!(progress.stats.current_streak, 1);
        assert_eq!(progress.stats.longest_streak, 2);
    }

    #[test]
    fn test_quiz_scoring() {
        let mut progress = Progress::default();
        let outcome = progress.record_quiz("m/quiz.json", 3, 4, true, day(1));
        assert_eq!(progress.quizzes["m/quiz.json"].score, 75);
        assert_eq!(outcome.xp_awarded, 15 + QUIZ_PASS_BONUS_XP);

        // lower score leaves the record alone
        progress.record_quiz("m/quiz.json", 1, 4, false, day(1));
        assert_eq!(progress.quizzes["m/quiz.json"].score, 75);
        assert!(progress.quiz_passed("m/quiz.json"));

        progress.record_quiz("m/quiz.json", 4, 4, true, day(1));
        assert_eq!(progress.quizzes["m/quiz.json"].score, 100);
        assert_eq!(progress.stats.total_xp, 25);
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        assert_eq!(Progress::load(temp.path()).unwrap(), Progress::default());

        let mut progress = Progress::default();
        progress.record_exercise("m/a", true, 20, day(1));
        progress.save(temp.path()).unwrap();

        let loaded = Progress::load(temp.path()).unwrap();
        assert_eq!(loaded, progress);
    }

    #[test]
    fn test_corrupt_progress_is_reported() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(env::state_dir_path(temp.path())).unwrap();
        fs::write(env::progress_file_path(temp.path()), "{not json").unwrap();
        assert!(matches!(
            Progress::load(temp.path()),
            Err(EngineError::Progress(_))
        ));
    }
}
