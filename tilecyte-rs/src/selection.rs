//! Region and tile selection strings: `all`, `1,3`, `0:10:2`, `-1`.
//!
//! Ranges use half-open `start:stop:step` with negative bounds counted from
//! the end, clamped to the valid range. The result is sorted and deduplicated.

use std::collections::BTreeSet;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Index(isize),
    Range {
        start: Option<isize>,
        stop: Option<isize>,
        step: isize,
    },
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Segments(Vec<Segment>),
}

fn bad(segment: &str) -> Error {
    Error::Configuration(format!("invalid selection segment {:?}", segment))
}

impl Selection {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(Selection::All);
        }
        let mut items = Vec::new();
        for segment in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let item = if segment.contains(':') {
                let parts: Vec<&str> = segment.split(':').map(str::trim).collect();
                if parts.len() > 3 {
                    return Err(bad(segment));
                }
                let num = |p: Option<&&str>| -> Result<Option<isize>> {
                    match p {
                        None => Ok(None),
                        Some(t) if t.is_empty() => Ok(None),
                        Some(t) => t.parse().map(Some).map_err(|_| bad(segment)),
                    }
                };
                let step = num(parts.get(2))?.unwrap_or(1);
                if step == 0 {
                    return Err(Error::Configuration(format!(
                        "selection step cannot be zero: {:?}",
                        segment
                    )));
                }
                Segment::Range {
                    start: num(parts.first())?,
                    stop: num(parts.get(1))?,
                    step,
                }
            } else if let Ok(i) = segment.parse::<isize>() {
                Segment::Index(i)
            } else {
                Segment::Name(segment.to_string())
            };
            items.push(item);
        }
        Ok(Selection::Segments(items))
    }

    /// Resolve against `len` positions. Names are looked up in `names` when
    /// given and rejected otherwise.
    pub fn resolve(&self, len: usize, names: Option<&[String]>) -> Result<Vec<usize>> {
        let items = match self {
            Selection::All => return Ok((0..len).collect()),
            Selection::Segments(items) => items,
        };
        let n = len as isize;
        let mut out = BTreeSet::new();
        for item in items {
            match item {
                Segment::Index(i) => {
                    if *i < -n || *i >= n {
                        return Err(Error::Configuration(format!(
                            "index {} out of range for {} entries",
                            i, len
                        )));
                    }
                    let i = if *i < 0 { i + n } else { *i };
                    out.insert(i as usize);
                }
                Segment::Range { start, stop, step } => {
                    out.extend(range_indices(*start, *stop, *step, n));
                }
                Segment::Name(name) => {
                    let pos = names
                        .and_then(|ns| ns.iter().position(|x| x == name))
                        .ok_or_else(|| Error::Configuration(format!("unknown entry {:?}", name)))?;
                    out.insert(pos);
                }
            }
        }
        Ok(out.into_iter().collect())
    }
}

fn clamp_bound(v: isize, n: isize, lo: isize) -> isize {
    if v < 0 {
        (v + n).max(lo)
    } else {
        v.min(n)
    }
}

fn range_indices(start: Option<isize>, stop: Option<isize>, step: isize, n: isize) -> Vec<usize> {
    let mut out = Vec::new();
    if step > 0 {
        let mut i = start.map_or(0, |v| clamp_bound(v, n, 0));
        let end = stop.map_or(n, |v| clamp_bound(v, n, 0));
        while i < end {
            out.push(i as usize);
            i += step;
        }
    } else {
        let mut i = start.map_or(n - 1, |v| clamp_bound(v, n, -1).min(n - 1));
        let end = stop.map_or(-1, |v| clamp_bound(v, n, -1));
        while i > end {
            out.push(i as usize);
            i += step;
        }
    }
    out
}
