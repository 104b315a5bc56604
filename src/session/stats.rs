use super::models::{Session, SessionStats};

/// Win/loss figures over sessions whose wager has resolved.
pub fn compute_stats(sessions: &[Session]) -> SessionStats {
    let resolved: Vec<&Session> = sessions.iter().filter(|s| s.status.is_resolved()).collect();
    let total_sessions = resolved.len();
    let wins = resolved.iter().filter(|s| s.is_win() == Some(true)).count();
    let losses = total_sessions - wins;
    let win_percentage = if total_sessions == 0 {
        0.0
    } else {
        ((wins as f64 / total_sessions as f64) * 10_000.0).round() / 100.0
    };
    SessionStats {
        total_sessions,
        wins,
        losses,
        win_percentage,
    }
}
