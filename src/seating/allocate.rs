use crate::seating::normalize::NormalizedRow;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DEFAULT_HALL_CAPACITY: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub hall_no: i64,
    pub seat_no: i64,
    pub reg_no: String,
    pub name: String,
    pub sub_code: String,
    pub sub_title: String,
    pub class_code: String,
    pub dept: String,
    pub date: String,
    pub sess: String,
    pub hall_key: String,
}

pub fn hall_key(date: &str, sess: &str, hall_no: i64) -> String {
    format!("{}-{}-H{}", date, sess, hall_no)
}

/// Non-positive capacities fall back to the default rather than failing the run.
pub fn effective_capacity(capacity: i64) -> i64 {
    if capacity <= 0 {
        DEFAULT_HALL_CAPACITY
    } else {
        capacity
    }
}

/// Capacity from loosely typed input: a number or a numeric string.
/// Fractions truncate; anything else is `None`.
pub fn parse_capacity(v: &serde_json::Value) -> Option<i64> {
    match v {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| f.trunc() as i64),
        _ => None,
    }
}

/// `fn`/`forenoon` -> `FN`, `an`/`afternoon` -> `AN`, anything else unchanged.
pub fn canonical_session(sess: &str) -> String {
    match sess.trim().to_lowercase().as_str() {
        "fn" | "forenoon" => "FN".to_string(),
        "an" | "afternoon" => "AN".to_string(),
        _ => sess.to_string(),
    }
}

pub fn session_rank(canonical: &str) -> u8 {
    match canonical {
        "FN" => 0,
        "AN" => 1,
        _ => 99,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum DateKey {
    Calendar(NaiveDateTime),
    Raw(String),
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d-%m-%Y",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%Y/%m/%d",
    "%d %b %Y",
    "%d-%b-%Y",
    "%b %d, %Y",
    "%m/%d/%Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Day-first shapes are tried before month-first; unparseable dates sort after
/// every calendar date, by raw text.
pub fn date_key(raw: &str) -> DateKey {
    let t = raw.trim();
    // Offset timestamps keep their own wall-clock date.
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return DateKey::Calendar(dt.naive_local());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(t, fmt) {
            return DateKey::Calendar(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(t, fmt) {
            return DateKey::Calendar(d.and_hms_opt(0, 0, 0).unwrap_or_default());
        }
    }
    DateKey::Raw(raw.to_string())
}

struct SortKey {
    date: DateKey,
    sess_rank: u8,
    sess: String,
}

// Canonical session text and raw date follow the rank so every
// (date, session) pair the walk sees forms one contiguous run.
fn compare(a: (&SortKey, &NormalizedRow), b: (&SortKey, &NormalizedRow)) -> Ordering {
    a.0.date
        .cmp(&b.0.date)
        .then(a.0.sess_rank.cmp(&b.0.sess_rank))
        .then_with(|| a.0.sess.cmp(&b.0.sess))
        .then_with(|| a.1.date.cmp(&b.1.date))
        .then_with(|| a.1.sub_code.cmp(&b.1.sub_code))
        .then_with(|| a.1.reg_no.cmp(&b.1.reg_no))
}

/// Stable sort into (date, session, subject, registration number) order.
pub fn sort_for_allocation(rows: &[NormalizedRow]) -> Vec<&NormalizedRow> {
    let mut keyed: Vec<(SortKey, &NormalizedRow)> = rows
        .iter()
        .map(|r| {
            let sess = canonical_session(&r.sess);
            (
                SortKey {
                    date: date_key(&r.date),
                    sess_rank: session_rank(&sess),
                    sess,
                },
                r,
            )
        })
        .collect();
    keyed.sort_by(|a, b| compare((&a.0, a.1), (&b.0, b.1)));
    keyed.into_iter().map(|(_, r)| r).collect()
}

/// Running position of the seating walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkState {
    pub session_key: Option<(String, String)>,
    pub hall_no: i64,
    pub seat_no: i64,
}

impl Default for WalkState {
    fn default() -> Self {
        Self {
            session_key: None,
            hall_no: 1,
            seat_no: 1,
        }
    }
}

/// One step of the walk: seat `row` and return the state for the next row.
/// A new (date, session) pair always restarts at hall 1, seat 1.
pub fn seat_row(
    state: WalkState,
    row: &NormalizedRow,
    capacity: i64,
) -> (WalkState, AllocationRecord) {
    let sess = canonical_session(&row.sess);
    let key = (row.date.clone(), sess.clone());

    let (hall_no, seat_no) = if state.session_key.as_ref() == Some(&key) {
        (state.hall_no, state.seat_no)
    } else {
        (1, 1)
    };

    let record = AllocationRecord {
        hall_no,
        seat_no,
        reg_no: row.reg_no.clone(),
        name: row.name.clone(),
        sub_code: row.sub_code.clone(),
        sub_title: row.sub_title.clone(),
        class_code: row.class_code.clone(),
        dept: row.dept.clone(),
        date: row.date.clone(),
        hall_key: hall_key(&row.date, &sess, hall_no),
        sess,
    };

    let (next_hall, next_seat) = if seat_no + 1 > capacity {
        (hall_no + 1, 1)
    } else {
        (hall_no, seat_no + 1)
    };

    (
        WalkState {
            session_key: Some(key),
            hall_no: next_hall,
            seat_no: next_seat,
        },
        record,
    )
}

pub fn allocate_seats(rows: &[NormalizedRow], capacity: i64) -> Vec<AllocationRecord> {
    let capacity = effective_capacity(capacity);
    let (_, records) = sort_for_allocation(rows).into_iter().fold(
        (WalkState::default(), Vec::with_capacity(rows.len())),
        |(state, mut out), row| {
            let (next, record) = seat_row(state, row, capacity);
            out.push(record);
            (next, out)
        },
    );
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(reg: &str, sub: &str, date: &str, sess: &str) -> NormalizedRow {
        NormalizedRow {
            reg_no: reg.to_string(),
            name: format!("Student {}", reg),
            sub_code: sub.to_string(),
            sub_title: String::new(),
            class_code: String::new(),
            dept: String::new(),
            date: date.to_string(),
            sess: sess.to_string(),
        }
    }

    #[test]
    fn thirty_five_rows_fill_one_hall_and_spill_five() {
        let rows: Vec<NormalizedRow> = (0..35)
            .map(|i| row(&format!("R{:03}", i), "CS101", "2024-01-10", "FN"))
            .collect();
        let out = allocate_seats(&rows, 30);
        assert_eq!(out.len(), 35);
        for (i, rec) in out.iter().enumerate().take(30) {
            assert_eq!(rec.hall_no, 1);
            assert_eq!(rec.seat_no, i as i64 + 1);
        }
        let tail: Vec<(i64, i64)> = out[30..].iter().map(|r| (r.hall_no, r.seat_no)).collect();
        assert_eq!(tail, vec![(2, 1), (2, 2), (2, 3), (2, 4), (2, 5)]);
        assert_eq!(out[34].hall_key, "2024-01-10-FN-H2");
    }

    #[test]
    fn chunking_holds_for_various_capacities() {
        for cap in 1..=7i64 {
            for n in 1..=20usize {
                let rows: Vec<NormalizedRow> = (0..n)
                    .map(|i| row(&format!("{:02}", i), "MA", "2024-02-01", "AN"))
                    .collect();
                let out = allocate_seats(&rows, cap);
                let halls = (n as i64 + cap - 1) / cap;
                assert_eq!(out.last().map(|r| r.hall_no), Some(halls));
                for h in 1..=halls {
                    let seats: Vec<i64> = out
                        .iter()
                        .filter(|r| r.hall_no == h)
                        .map(|r| r.seat_no)
                        .collect();
                    let expected = if h < halls {
                        cap
                    } else {
                        let rem = n as i64 % cap;
                        if rem == 0 {
                            cap
                        } else {
                            rem
                        }
                    };
                    assert_eq!(seats, (1..=expected).collect::<Vec<_>>());
                }
            }
        }
    }

    #[test]
    fn new_session_resets_numbering_regardless_of_fill() {
        let rows = vec![
            row("1", "A", "2024-01-10", "FN"),
            row("2", "A", "2024-01-10", "FN"),
            row("3", "A", "2024-01-10", "FN"),
            row("4", "A", "2024-01-10", "AN"),
            row("5", "A", "2024-01-11", "FN"),
        ];
        let out = allocate_seats(&rows, 2);
        let got: Vec<(i64, i64)> = out.iter().map(|r| (r.hall_no, r.seat_no)).collect();
        assert_eq!(got, vec![(1, 1), (1, 2), (2, 1), (1, 1), (1, 1)]);
    }

    #[test]
    fn forenoon_spellings_share_one_bucket() {
        let rows = vec![
            row("1", "A", "2024-01-10", "Forenoon"),
            row("2", "A", "2024-01-10", " fn "),
        ];
        let out = allocate_seats(&rows, 30);
        assert_eq!(out[0].sess, "FN");
        assert_eq!(out[1].sess, "FN");
        assert_eq!((out[1].hall_no, out[1].seat_no), (1, 2));
    }

    #[test]
    fn sorts_by_date_then_session_then_subject_then_reg() {
        let rows = vec![
            row("9", "B", "11/01/2024", "FN"),
            row("2", "B", "2024-01-10", "AN"),
            row("1", "B", "2024-01-10", "FN"),
            row("3", "A", "2024-01-10", "FN"),
            row("0", "A", "2024-01-10", "EV"),
        ];
        let out = allocate_seats(&rows, 30);
        let order: Vec<&str> = out.iter().map(|r| r.reg_no.as_str()).collect();
        assert_eq!(order, vec!["3", "1", "2", "0", "9"]);
        assert_eq!(out[3].sess, "EV");
    }

    #[test]
    fn other_sessions_on_one_date_stay_contiguous() {
        let rows = vec![
            row("1", "A", "2024-01-10", "EV"),
            row("2", "B", "2024-01-10", "MN"),
            row("3", "C", "2024-01-10", "EV"),
        ];
        let out = allocate_seats(&rows, 30);
        let got: Vec<(&str, &str, i64, i64)> = out
            .iter()
            .map(|r| (r.reg_no.as_str(), r.sess.as_str(), r.hall_no, r.seat_no))
            .collect();
        assert_eq!(
            got,
            vec![("1", "EV", 1, 1), ("3", "EV", 1, 2), ("2", "MN", 1, 1)]
        );
    }

    #[test]
    fn date_spellings_of_one_day_do_not_interleave() {
        let rows = vec![
            row("1", "A", "2024-01-10", "FN"),
            row("2", "B", "10/01/2024", "FN"),
            row("3", "C", "2024-01-10", "FN"),
        ];
        let out = allocate_seats(&rows, 30);
        let mut keys: Vec<(&str, &str, i64, i64)> = out
            .iter()
            .map(|r| (r.date.as_str(), r.sess.as_str(), r.hall_no, r.seat_no))
            .collect();
        let n = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), n);
        let order: Vec<&str> = out.iter().map(|r| r.reg_no.as_str()).collect();
        assert_eq!(order, vec!["2", "1", "3"]);
    }

    #[test]
    fn identical_keys_keep_input_order() {
        let mut a = row("7", "A", "2024-01-10", "FN");
        a.name = "first".into();
        let mut b = row("7", "A", "2024-01-10", "FN");
        b.name = "second".into();
        let out = allocate_seats(&[a, b], 30);
        assert_eq!(out[0].name, "first");
        assert_eq!(out[1].name, "second");
    }

    #[test]
    fn unparseable_dates_order_by_raw_text_after_calendar_dates() {
        assert!(date_key("2024-01-10") < date_key("TBD"));
        assert!(date_key("exam-b") > date_key("exam-a"));
        assert_eq!(date_key("10/01/2024"), date_key("2024-01-10"));
        assert_eq!(date_key("2024-01-10T00:00:00"), date_key("10-01-2024"));
    }

    #[test]
    fn offset_timestamps_and_month_names_are_calendar_dates() {
        let jan10 = date_key("2024-01-10");
        assert_eq!(date_key("2024-01-10T00:00:00.000Z"), jan10);
        assert_eq!(date_key("2024-01-10T00:00:00+05:30"), jan10);
        assert_eq!(date_key("10 Jan 2024"), jan10);
        assert_eq!(date_key("10-Jan-2024"), jan10);
        assert_eq!(date_key("Jan 10, 2024"), jan10);

        let rows = vec![
            row("1", "A", "2024-01-11", "FN"),
            row("2", "A", "2024-01-10T00:00:00.000Z", "FN"),
        ];
        let out = allocate_seats(&rows, 30);
        assert_eq!(out[0].reg_no, "2");
        assert_eq!(out[1].reg_no, "1");
    }

    #[test]
    fn invalid_capacity_is_repaired() {
        assert_eq!(effective_capacity(0), 30);
        assert_eq!(effective_capacity(-4), 30);
        assert_eq!(parse_capacity(&serde_json::json!("abc")), None);
        assert_eq!(parse_capacity(&serde_json::json!("NaN")), None);
        assert_eq!(parse_capacity(&serde_json::json!(" 12 ")), Some(12));
        assert_eq!(parse_capacity(&serde_json::json!(24.0)), Some(24));

        let rows: Vec<NormalizedRow> = (0..31)
            .map(|i| row(&format!("{:02}", i), "A", "2024-01-10", "FN"))
            .collect();
        let out = allocate_seats(&rows, 0);
        assert_eq!((out[30].hall_no, out[30].seat_no), (2, 1));
    }

    #[test]
    fn seat_row_is_a_pure_step() {
        let r = row("1", "A", "2024-01-10", "FN");
        let (s1, rec1) = seat_row(WalkState::default(), &r, 1);
        assert_eq!((rec1.hall_no, rec1.seat_no), (1, 1));
        assert_eq!((s1.hall_no, s1.seat_no), (2, 1));
        let (_, rec2) = seat_row(s1, &r, 1);
        assert_eq!((rec2.hall_no, rec2.seat_no), (2, 1));
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(allocate_seats(&[], 30).is_empty());
    }
}
