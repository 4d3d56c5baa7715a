//! Status vocabularies: raw reply tokens to canonical verdicts.
//!
//! Each protocol answers with its own status strings. A vocabulary is an
//! ordered token table; classification is a case-insensitive substring match
//! and the first entry that matches wins.

use std::fmt;

use warehouse_state::FlagOutcome;

/// Canonical reading of a scoring-service reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Accepted,
    Invalid,
    TooOld,
    OwnFlag,
    AlreadyClaimed,
    ExcludedTeam,
    Unavailable,
}

impl Verdict {
    /// Outcome persisted for this verdict. `Unavailable` leaves the flag pending.
    pub fn outcome(self) -> Option<FlagOutcome> {
        match self {
            Verdict::Invalid | Verdict::OwnFlag | Verdict::ExcludedTeam => {
                Some(FlagOutcome::Rejected)
            }
            Verdict::TooOld => Some(FlagOutcome::Expired),
            Verdict::Accepted | Verdict::AlreadyClaimed => Some(FlagOutcome::Success),
            Verdict::Unavailable => None,
        }
    }
}

/// Ordered token table of one protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusVocabulary {
    entries: Vec<(Verdict, &'static str)>,
}

impl StatusVocabulary {
    /// Build a table from its tokens. Match order is rejections first, then
    /// age, then acceptance, then unavailability.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accepted: &'static str,
        invalid: &'static str,
        too_old: &'static str,
        own_flag: &'static str,
        already_claimed: &'static str,
        excluded_team: &'static str,
        unavailable: &'static str,
    ) -> Self {
        Self {
            entries: vec![
                (Verdict::Invalid, invalid),
                (Verdict::OwnFlag, own_flag),
                (Verdict::ExcludedTeam, excluded_team),
                (Verdict::TooOld, too_old),
                (Verdict::Accepted, accepted),
                (Verdict::AlreadyClaimed, already_claimed),
                (Verdict::Unavailable, unavailable),
            ],
        }
    }

    /// Vocabulary of the batched HTTP protocol.
    pub fn http() -> Self {
        Self::new(
            "accepted",
            "invalid",
            "too old",
            "your own",
            "already claimed",
            "from NOP team",
            "is not available",
        )
    }

    /// Vocabulary of the line-oriented protocol.
    pub fn line() -> Self {
        Self::new("OK", "INV", "OLD", "OWN", "DUP", "INV", "ERR")
    }

    /// Vocabulary of the dry-run submitter.
    pub fn dummy() -> Self {
        Self::new(
            "accepted",
            "invalid",
            "too old",
            "your own",
            "already stolen",
            "from NOP team",
            "is not available",
        )
    }

    /// Token this vocabulary uses for `verdict`.
    pub fn token(&self, verdict: Verdict) -> &'static str {
        self.entries
            .iter()
            .find(|(v, _)| *v == verdict)
            .map(|(_, token)| *token)
            .unwrap_or_default()
    }

    /// First verdict whose token occurs in `raw`, ignoring case.
    pub fn classify(&self, raw: &str) -> Option<Verdict> {
        let raw = raw.to_lowercase();
        self.entries
            .iter()
            .find(|(_, token)| raw.contains(&token.to_lowercase()))
            .map(|(verdict, _)| *verdict)
    }
}

/// Per-batch verdict counts, for the submission summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTally {
    pub submitted: usize,
    pub accepted: usize,
    pub old: usize,
    pub nop: usize,
    pub yours: usize,
    pub invalid: usize,
    pub unavailable: usize,
    pub unrecognised: usize,
}

impl BatchTally {
    pub fn new(submitted: usize) -> Self {
        Self {
            submitted,
            ..Self::default()
        }
    }

    pub fn record(&mut self, verdict: Option<Verdict>) {
        match verdict {
            Some(Verdict::Accepted | Verdict::AlreadyClaimed) => self.accepted += 1,
            Some(Verdict::TooOld) => self.old += 1,
            Some(Verdict::ExcludedTeam) => self.nop += 1,
            Some(Verdict::OwnFlag) => self.yours += 1,
            Some(Verdict::Invalid) => self.invalid += 1,
            Some(Verdict::Unavailable) => self.unavailable += 1,
            None => self.unrecognised += 1,
        }
    }

    /// Flags that received a persisted outcome.
    pub fn resolved(&self) -> usize {
        self.accepted + self.old + self.nop + self.yours + self.invalid
    }
}

impl fmt::Display for BatchTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Submitted {} flags: {} accepted",
            self.submitted, self.accepted
        )?;
        for (count, label) in [
            (self.old, "old"),
            (self.nop, "nop"),
            (self.yours, "yours"),
            (self.invalid, "invalid"),
        ] {
            if count > 0 {
                write!(f, ", {count} {label}")?;
            }
        }
        Ok(())
    }
}
