//! `ft2dshield`: convert the sensor's CSV log into DShield TSV reports.
//!
//! Grounded on the original converter's `ftlogparse`/`ftlogprint`/`ft2header`
//! trio, reusing [`crate::csv`]'s shared record type rather than re-deriving
//! a second CSV parser — the two binaries must never drift apart on the
//! wire format.

use std::io::{BufRead, Write};

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::csv::{self, CsvRecord};
use crate::error::FlytrapError;
use crate::ip4set::Ip4Set;

pub const DEFAULT_RECIPIENT: &str = "reports@dshield.org";

/// Address-set and time-window filters applied to every record.
pub struct DshieldFilter {
    pub src_set: Option<Ip4Set>,
    pub dst_set: Option<Ip4Set>,
    pub from: i64,
    pub to: i64,
}

impl Default for DshieldFilter {
    fn default() -> Self {
        Self {
            src_set: None,
            dst_set: None,
            from: 0,
            to: i64::MAX,
        }
    }
}

impl DshieldFilter {
    fn accepts(&self, record: &CsvRecord) -> bool {
        if record.sec < self.from || record.sec > self.to {
            return false;
        }
        if let Some(set) = &self.src_set {
            if !set.lookup(record.src) {
                return false;
            }
        }
        if let Some(set) = &self.dst_set {
            if !set.lookup(record.dst) {
                return false;
            }
        }
        true
    }
}

/// Parse a `YYYY-MM-DD[THH:MM:SS[Z]]` / `YYYYMMDD[HHMMSS[Z]]` date-time
/// bound. A missing date defaults to today (local); a missing time defaults
/// to `00:00:00` for a lower bound (`high = false`) or `23:59:59` for an
/// upper bound. A trailing `Z` forces UTC interpretation instead of local.
pub fn parse_date_bound(input: &str, high: bool) -> Result<i64, FlytrapError> {
    let mut rest = input;
    let mut date_matched = false;
    let date = match take_date_prefix(rest) {
        Some((d, r)) => {
            date_matched = true;
            rest = r;
            if let Some(r2) = rest.strip_prefix('T').or_else(|| rest.strip_prefix(' ')) {
                rest = r2;
            }
            d
        }
        None => Local::now().date_naive(),
    };

    let mut time_matched = false;
    let mut utc = false;
    let time = match take_time_prefix(rest) {
        Some((t, r)) => {
            time_matched = true;
            rest = r;
            if let Some(r2) = rest.strip_prefix('Z') {
                utc = true;
                rest = r2;
            }
            t
        }
        None if high => NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
        None => NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
    };

    if !date_matched && !time_matched {
        return Err(FlytrapError::InvalidDate(input.to_string()));
    }
    if !rest.is_empty() {
        return Err(FlytrapError::InvalidDate(input.to_string()));
    }

    let naive = NaiveDateTime::new(date, time);
    let ts = if utc {
        Utc.from_utc_datetime(&naive).timestamp()
    } else {
        match Local.from_local_datetime(&naive).single() {
            Some(dt) => dt.timestamp(),
            None => Local.from_local_datetime(&naive).earliest().ok_or_else(|| FlytrapError::InvalidDate(input.to_string()))?.timestamp(),
        }
    };
    Ok(ts)
}

fn take_date_prefix(s: &str) -> Option<(NaiveDate, &str)> {
    // "%Y-%m-%d"
    if s.len() >= 10 && s.as_bytes()[4] == b'-' && s.as_bytes()[7] == b'-' {
        if let (Some(y), Some(m), Some(d)) = (digits(&s[0..4]), digits(&s[5..7]), digits(&s[8..10])) {
            if let Some(date) = NaiveDate::from_ymd_opt(y as i32, m, d) {
                return Some((date, &s[10..]));
            }
        }
    }
    // "%Y%m%d"
    if s.len() >= 8 && s.as_bytes()[..8].iter().all(u8::is_ascii_digit) {
        if let (Some(y), Some(m), Some(d)) = (digits(&s[0..4]), digits(&s[4..6]), digits(&s[6..8])) {
            if let Some(date) = NaiveDate::from_ymd_opt(y as i32, m, d) {
                return Some((date, &s[8..]));
            }
        }
    }
    None
}

fn take_time_prefix(s: &str) -> Option<(NaiveTime, &str)> {
    // "%H:%M:%S"
    if s.len() >= 8 && s.as_bytes()[2] == b':' && s.as_bytes()[5] == b':' {
        if let (Some(h), Some(m), Some(sec)) = (digits(&s[0..2]), digits(&s[3..5]), digits(&s[6..8])) {
            if let Some(t) = NaiveTime::from_hms_opt(h, m, sec) {
                return Some((t, &s[8..]));
            }
        }
    }
    // "%H%M%S"
    if s.len() >= 6 && s.as_bytes()[..6].iter().all(u8::is_ascii_digit) {
        if let (Some(h), Some(m), Some(sec)) = (digits(&s[0..2]), digits(&s[2..4]), digits(&s[4..6])) {
            if let Some(t) = NaiveTime::from_hms_opt(h, m, sec) {
                return Some((t, &s[6..]));
            }
        }
    }
    None
}

fn digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Reduce the 9-character `NCEUAPRSF` flag string down to the letters the
/// DShield format keeps (`S`, `A`, `F`, `U`, `R`, `P`), in the order they
/// appear; `N`/`C`/`E`/`-` are dropped.
fn tcp_flags_for_dshield(flags: &str) -> Result<String, FlytrapError> {
    let mut out = String::new();
    for ch in flags.chars() {
        match ch {
            'S' | 'A' | 'F' | 'U' | 'R' | 'P' => out.push(ch),
            'N' | 'C' | 'E' | '-' => {}
            _ => return Err(FlytrapError::InvalidAddress(format!("malformed TCP flags: {flags}"))),
        }
    }
    Ok(out)
}

/// Reinterpret a record's `proto_info` column per protocol: ICMP's
/// `type.code` is folded back into the source/destination port columns (the
/// legacy DShield quirk, local to this converter — the sensor's own CSV
/// never encodes it that way), TCP's flag string is reduced, UDP carries no
/// trailer.
fn dshield_fields(record: &CsvRecord) -> Result<(u16, u16, String), FlytrapError> {
    match record.proto.as_str() {
        "ICMP" => {
            let (t, c) = record
                .proto_info
                .split_once('.')
                .ok_or_else(|| FlytrapError::InvalidAddress(format!("malformed ICMP type.code: {}", record.proto_info)))?;
            let icmp_type: u16 = t.parse().map_err(|_| FlytrapError::InvalidAddress(t.to_string()))?;
            let icmp_code: u16 = c.parse().map_err(|_| FlytrapError::InvalidAddress(c.to_string()))?;
            Ok((icmp_type, icmp_code, String::new()))
        }
        "TCP" => Ok((record.sport, record.dport, tcp_flags_for_dshield(&record.proto_info)?)),
        "UDP" => Ok((record.sport, record.dport, String::new())),
        other => Err(FlytrapError::InvalidAddress(format!("unknown protocol: {other}"))),
    }
}

/// Render one DShield TSV line for `record`, or `None` if the record is
/// filtered out.
pub fn format_line(record: &CsvRecord, userid: u64, filter: &DshieldFilter) -> Result<Option<String>, FlytrapError> {
    if !filter.accepts(record) {
        return Ok(None);
    }
    let (sp, dp, trailer) = dshield_fields(record)?;
    let when = Local
        .timestamp_opt(record.sec, 0)
        .single()
        .ok_or_else(|| FlytrapError::InvalidDate(record.sec.to_string()))?;
    let tstr = when.format("%Y-%m-%d %H:%M:%S %z");

    Ok(Some(format!(
        "{tstr}\t{userid}\t1\t{}\t{sp}\t{}\t{dp}\t{}\t{trailer}\n",
        record.src, record.dst, record.proto
    )))
}

/// Convert every line of `reader` matching `filter`, writing DShield TSV
/// rows to `writer`. Unparseable or rejected lines are skipped (and
/// reported to the caller via `on_warning`), matching the original's
/// continue-on-error line loop.
pub fn convert_stream<R: BufRead, W: Write>(reader: R, mut writer: W, userid: u64, filter: &DshieldFilter, mut on_warning: impl FnMut(&str)) -> Result<(), FlytrapError> {
    for line in reader.lines() {
        let line = line.map_err(FlytrapError::CsvOpen)?;
        if line.is_empty() {
            continue;
        }
        let record = match csv::parse_line(&line) {
            Some(r) => r,
            None => {
                on_warning("unparseable log entry");
                continue;
            }
        };
        match format_line(&record, userid, filter) {
            Ok(Some(out)) => write!(writer, "{out}").map_err(FlytrapError::CsvOpen)?,
            Ok(None) => {}
            Err(e) => on_warning(&e.to_string()),
        }
    }
    Ok(())
}

/// The optional email header block emitted when `-r`/`-s`/`-u` are given.
pub fn email_header(sender: &str, recipient: &str, userid: u64) -> String {
    let now = Utc::now();
    let tstr = now.format("%d %b %Y %H:%M:%S %z");
    let zstr = tstr.to_string().rsplit(' ').next().unwrap_or("+0000").to_string();
    format!(
        "Date: {tstr}\nFrom: {sender}\nTo: {recipient}\nSubject: FORMAT DSHIELD USERID {userid} TZ {zstr} {} {}\n\n",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    )
}
