// rman-backup/src/backup/format.rs
//! Device dependent strings used inside RMAN directives: piece formats,
//! controlfile autobackup format, tags and the retention/compression clauses.
//!
//! Everything here is pure. The generation time is passed in so that every
//! directive of one plan shares the same timestamp.

use chrono::{Days, NaiveDate, NaiveDateTime};

use crate::config::{Device, RetentionPolicy};

const PIECE_EXTENSION: &str = "bkp";

/// What a backup piece contains; becomes part of the piece file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceKind {
    DatafileLevel0,
    DatafileLevel1,
    Archivelog,
    Controlfile,
}

impl PieceKind {
    fn code(self) -> &'static str {
        match self {
            PieceKind::DatafileLevel0 => "df_lvl0",
            PieceKind::DatafileLevel1 => "df_lvl1",
            PieceKind::Archivelog => "al",
            PieceKind::Controlfile => "cf",
        }
    }
}

/// Prefix of a generated tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Level0,
    Level1,
    Archivelog,
    Controlfile,
}

impl TagKind {
    fn prefix(self) -> &'static str {
        match self {
            TagKind::Level0 => "LVL0",
            TagKind::Level1 => "LVL1",
            TagKind::Archivelog => "ARCH",
            TagKind::Controlfile => "CTL",
        }
    }
}

/// Piece name template. Tape gets the bare template, disk roots it under
/// the destination directory and adds an extension.
pub fn backup_format(device: &Device, kind: PieceKind) -> String {
    let piece = format!("%d_{}_%s_%p_%t_%T", kind.code());
    match device {
        Device::Tape { .. } => piece,
        Device::Disk { destination } => destination
            .join(format!("{}.{}", piece, PIECE_EXTENSION))
            .display()
            .to_string(),
    }
}

pub fn controlfile_format(device: &Device) -> String {
    match device {
        Device::Tape { .. } => "%F".to_string(),
        Device::Disk { destination } => destination.join("%F").display().to_string(),
    }
}

pub fn retention_clause(policy: RetentionPolicy) -> String {
    policy.to_string()
}

pub fn compression_clause(compressed: bool) -> &'static str {
    if compressed { "AS COMPRESSED BACKUPSET" } else { "" }
}

/// Plain calendar arithmetic: generation date plus `keep_days`.
pub fn expiration_date(generated_at: NaiveDateTime, keep_days: u32) -> NaiveDate {
    let date = generated_at.date();
    date.checked_add_days(Days::new(u64::from(keep_days)))
        .unwrap_or(NaiveDate::MAX)
}

/// Builds a backup tag.
///
/// The base is `override_tag` when given, otherwise `<KIND>_<ddmmyyyy_hhmm>`.
/// With `keep_days` the tag gets an `_E<ddmmyyyy>` suffix carrying the
/// expiration date computed by `expiration`.
pub fn tag<F>(
    kind: TagKind,
    keep_days: Option<u32>,
    override_tag: Option<&str>,
    generated_at: NaiveDateTime,
    expiration: F,
) -> String
where
    F: Fn(NaiveDateTime, u32) -> NaiveDate,
{
    let base = match override_tag {
        Some(tag) => tag.to_string(),
        None => format!("{}_{}", kind.prefix(), generated_at.format("%d%m%Y_%H%M")),
    };
    match keep_days {
        Some(days) => format!("{}_E{}", base, expiration(generated_at, days).format("%d%m%Y")),
        None => base,
    }
}
