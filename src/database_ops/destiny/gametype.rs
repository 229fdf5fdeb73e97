use crate::models::MatchKind;

/// Activity mode codes reported for competitive (Crucible) activities.
pub const PVP_MODES: [i32; 14] = [5, 9, 10, 11, 12, 13, 14, 15, 19, 23, 24, 25, 26, 28];

pub const TRIALS_OF_OSIRIS_MODE: i32 = 14;

pub fn is_pvp(mode: i32) -> bool {
    PVP_MODES.contains(&mode)
}

/// Kind a freshly ingested game is stored with. An explicit hint wins;
/// otherwise competitive modes are tagged from the mode table.
pub fn classify(hint: MatchKind, mode: Option<i32>) -> MatchKind {
    match (hint, mode) {
        (MatchKind::Unclassified, Some(TRIALS_OF_OSIRIS_MODE)) => MatchKind::TrialsOfOsiris,
        (MatchKind::Unclassified, Some(mode)) if is_pvp(mode) => MatchKind::Pvp,
        (hint, _) => hint,
    }
}

/// Kinds accepted as a Destiny type hint.
pub fn is_destiny_kind(kind: MatchKind) -> bool {
    !matches!(kind, MatchKind::Arena | MatchKind::Warzone)
}
