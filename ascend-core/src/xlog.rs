//! NetHack xlogfile entries.
//!
//! One line per finished game, `key=value` fields separated by tabs. Some
//! variants separate with colons instead; values there may themselves
//! contain colons, so a colon-split piece without `=` is glued back onto
//! the previous value.

use crate::types::{CheatMode, NewOutcome};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XlogError {
    #[error("blank line")]
    Blank,

    #[error("no key=value fields")]
    NoFields,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is not a number: {value}")]
    BadNumber { field: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XlogEntry {
    /// Numeric uid of the account that played the game.
    pub uid: String,
    pub name: String,
    pub death: String,
    pub points: i64,
    pub turns: i64,
    pub endtime: i64,
    pub flags: u64,
    pub role: Option<String>,
    pub race: Option<String>,
}

impl XlogEntry {
    pub fn parse(line: &str) -> Result<Self, XlogError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(XlogError::Blank);
        }

        let fields = split_fields(line);
        if fields.is_empty() {
            return Err(XlogError::NoFields);
        }

        let uid = fields
            .get("uid")
            .filter(|v| !v.is_empty())
            .ok_or(XlogError::MissingField("uid"))?;
        let endtime = fields.get("endtime").ok_or(XlogError::MissingField("endtime"))?;

        Ok(Self {
            uid: uid.clone(),
            name: fields.get("name").cloned().unwrap_or_default(),
            death: fields.get("death").cloned().unwrap_or_default(),
            points: optional_number(&fields, "points")?,
            turns: optional_number(&fields, "turns")?,
            endtime: parse_number("endtime", endtime)?,
            flags: fields
                .get("flags")
                .map(|v| parse_flags(v))
                .transpose()?
                .unwrap_or(0),
            role: fields.get("role").cloned(),
            race: fields.get("race").cloned(),
        })
    }

    /// The game reached the Astral Plane and offered the amulet.
    pub fn ascended(&self) -> bool {
        self.death.to_ascii_lowercase().contains("ascended")
    }

    pub fn cheat_mode(&self) -> Option<CheatMode> {
        CheatMode::from_flags(self.flags)
    }

    /// Outcome facts for storage. Wizard and explore games score zero,
    /// carry a mode prefix on the death text and never count as ascensions.
    pub fn to_new_outcome(&self) -> NewOutcome {
        let cheat_mode = self.cheat_mode();
        let (ascended, score, death) = match cheat_mode {
            Some(mode) => (
                false,
                0,
                format!("[{} MODE] {}", mode.as_str().to_ascii_uppercase(), self.death),
            ),
            None => (self.ascended(), self.points, self.death.clone()),
        };

        NewOutcome {
            account_id: self.uid.clone(),
            character_name: self.name.clone(),
            ascended,
            cheat_mode,
            score,
            turns: self.turns,
            death,
            end_time: self.endtime,
        }
    }

    /// Render back to a tab-separated line. Used by the simulator.
    pub fn to_line(&self) -> String {
        let mut fields = vec![
            format!("points={}", self.points),
            format!("uid={}", self.uid),
        ];
        if let Some(role) = &self.role {
            fields.push(format!("role={}", role));
        }
        if let Some(race) = &self.race {
            fields.push(format!("race={}", race));
        }
        fields.push(format!("name={}", self.name));
        fields.push(format!("death={}", self.death));
        fields.push(format!("turns={}", self.turns));
        fields.push(format!("endtime={}", self.endtime));
        fields.push(format!("flags={:#x}", self.flags));
        fields.join("\t")
    }
}

impl FromStr for XlogEntry {
    type Err = XlogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn split_fields(line: &str) -> HashMap<String, String> {
    let pieces: Vec<String> = if line.contains('\t') {
        line.split('\t').map(str::to_string).collect()
    } else {
        let mut pieces: Vec<String> = Vec::new();
        for piece in line.split(':') {
            match pieces.last_mut() {
                Some(last) if !piece.contains('=') => {
                    last.push(':');
                    last.push_str(piece);
                }
                _ => pieces.push(piece.to_string()),
            }
        }
        pieces
    };

    pieces
        .iter()
        .filter_map(|piece| piece.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

fn parse_number(field: &'static str, value: &str) -> Result<i64, XlogError> {
    value.parse::<i64>().map_err(|_| XlogError::BadNumber {
        field,
        value: value.to_string(),
    })
}

fn optional_number(fields: &HashMap<String, String>, field: &'static str) -> Result<i64, XlogError> {
    fields
        .get(field)
        .map(|v| parse_number(field, v))
        .transpose()
        .map(|v| v.unwrap_or(0))
}

fn parse_flags(value: &str) -> Result<u64, XlogError> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse::<u64>(),
    };
    parsed.map_err(|_| XlogError::BadNumber {
        field: "flags",
        value: value.to_string(),
    })
}
