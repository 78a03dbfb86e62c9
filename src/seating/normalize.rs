use crate::seating::error::SeatingError;
use serde::{Deserialize, Serialize};

/// One decoded spreadsheet data row: `(header, cell)` pairs in source column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    cells: Vec<(String, serde_json::Value)>,
}

#[allow(dead_code)]
impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, header: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.cells.push((header.into(), value.into()));
        self
    }

    pub fn from_object(obj: &serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            cells: obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }

    pub fn from_cells(headers: &[String], values: &[serde_json::Value]) -> Self {
        Self {
            cells: headers
                .iter()
                .enumerate()
                .map(|(i, h)| {
                    (
                        h.clone(),
                        values.get(i).cloned().unwrap_or(serde_json::Value::Null),
                    )
                })
                .collect(),
        }
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(h, _)| h.as_str())
    }

    pub fn get(&self, header: &str) -> Option<&serde_json::Value> {
        self.cells.iter().find(|(h, _)| h == header).map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub reg_no: String,
    pub name: String,
    pub sub_code: String,
    pub sub_title: String,
    pub class_code: String,
    pub dept: String,
    pub date: String,
    pub sess: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    RegNo,
    Name,
    SubCode,
    SubTitle,
    Date,
    Sess,
    ClassCode,
    Dept,
}

impl Field {
    pub fn column(self) -> &'static str {
        match self {
            Field::RegNo => "REG_NO",
            Field::Name => "NAME",
            Field::SubCode => "SUB_CODE",
            Field::SubTitle => "SUB_TITLE",
            Field::Date => "DATE",
            Field::Sess => "SESS",
            Field::ClassCode => "CLASS",
            Field::Dept => "DEPT",
        }
    }

    fn slot(self, row: &mut NormalizedRow) -> &mut String {
        match self {
            Field::RegNo => &mut row.reg_no,
            Field::Name => &mut row.name,
            Field::SubCode => &mut row.sub_code,
            Field::SubTitle => &mut row.sub_title,
            Field::Date => &mut row.date,
            Field::Sess => &mut row.sess,
            Field::ClassCode => &mut row.class_code,
            Field::Dept => &mut row.dept,
        }
    }

    fn value(self, row: &NormalizedRow) -> &str {
        match self {
            Field::RegNo => &row.reg_no,
            Field::Name => &row.name,
            Field::SubCode => &row.sub_code,
            Field::SubTitle => &row.sub_title,
            Field::Date => &row.date,
            Field::Sess => &row.sess,
            Field::ClassCode => &row.class_code,
            Field::Dept => &row.dept,
        }
    }
}

/// Header aliases per canonical field, highest priority first.
/// New spellings go here; nothing else needs to change.
pub const ALIASES: &[(Field, &[&str])] = &[
    (
        Field::RegNo,
        &[
            "reg_no",
            "reg no",
            "register no",
            "register_no",
            "regno",
            "roll",
            "enr",
            "enrollment no",
        ],
    ),
    (Field::Name, &["name of the student", "student name", "name"]),
    (
        Field::SubCode,
        &["sub_code", "sub code", "subject code", "subject"],
    ),
    (
        Field::SubTitle,
        &[
            "sub_title",
            "sub title",
            "subject title",
            "subject name",
            "subname",
        ],
    ),
    (Field::Date, &["date", "exam date", "exam_date"]),
    (Field::Sess, &["sess", "session", "session code"]),
    (
        Field::ClassCode,
        &["class code", "class_code", "class", "classcode"],
    ),
    (Field::Dept, &["dept", "department", "dept."]),
];

pub const REQUIRED: &[Field] = &[
    Field::RegNo,
    Field::Name,
    Field::SubCode,
    Field::Date,
    Field::Sess,
];

/// Lower-case and drop everything that is not an ASCII letter or digit.
pub fn canonical_header(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

pub fn cell_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return i.to_string();
            }
            if let Some(u) = n.as_u64() {
                return u.to_string();
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
                    format!("{}", f as i64)
                }
                Some(f) => f.to_string(),
                None => n.to_string(),
            }
        }
        other => other.to_string(),
    }
}

/// Map each canonical field to the source header that will feed it.
pub fn resolve_headers<'a, I>(headers: I) -> Vec<(Field, Option<String>)>
where
    I: IntoIterator<Item = &'a str>,
{
    // Leftmost source header wins when two canonicalize identically.
    let mut seen: Vec<(String, String)> = Vec::new();
    for h in headers {
        let key = canonical_header(h);
        if !seen.iter().any(|(k, _)| *k == key) {
            seen.push((key, h.to_string()));
        }
    }

    ALIASES
        .iter()
        .map(|(field, aliases)| {
            let src = aliases.iter().find_map(|alias| {
                let want = canonical_header(alias);
                seen.iter()
                    .find(|(k, _)| *k == want)
                    .map(|(_, original)| original.clone())
            });
            (*field, src)
        })
        .collect()
}

pub fn normalize_rows(rows: &[RawRow]) -> Result<Vec<NormalizedRow>, SeatingError> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let mapping = resolve_headers(first.headers());

    let out: Vec<NormalizedRow> = rows
        .iter()
        .map(|raw| {
            let mut row = NormalizedRow::default();
            for (field, src) in &mapping {
                if let Some(v) = src.as_deref().and_then(|h| raw.get(h)) {
                    *field.slot(&mut row) = cell_text(v);
                }
            }
            row
        })
        .collect();

    let missing: Vec<String> = REQUIRED
        .iter()
        .filter(|f| out.iter().all(|r| f.value(r).trim().is_empty()))
        .map(|f| f.column().to_string())
        .collect();
    if !missing.is_empty() {
        return Err(SeatingError::MissingColumns(missing));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn timetable_row(reg: &str, sub: &str) -> RawRow {
        RawRow::new()
            .with("Reg No", reg)
            .with("Name of the Student", "Asha")
            .with("Subject Code", sub)
            .with("Exam Date", "2024-01-10")
            .with("Session", "FN")
    }

    #[test]
    fn canonical_header_strips_punctuation_and_case() {
        assert_eq!(canonical_header(" Reg_No. "), "regno");
        assert_eq!(canonical_header("Name of the Student"), "nameofthestudent");
        assert_eq!(canonical_header("DEPT."), "dept");
    }

    #[test]
    fn output_preserves_length_and_order() {
        let rows = vec![
            timetable_row("3", "MA101"),
            timetable_row("1", "CS101"),
            timetable_row("2", "MA101"),
        ];
        let out = normalize_rows(&rows).expect("normalize");
        let regs: Vec<&str> = out.iter().map(|r| r.reg_no.as_str()).collect();
        assert_eq!(regs, vec!["3", "1", "2"]);
        assert_eq!(out[1].sub_code, "CS101");
        assert_eq!(out[0].sess, "FN");
        assert_eq!(out[0].dept, "");
    }

    #[test]
    fn higher_priority_alias_wins_regardless_of_column_order() {
        let rows = vec![RawRow::new()
            .with("Roll", "R-9")
            .with("RegNo", "2021001")
            .with("Name", "Asha")
            .with("Subject", "ignored")
            .with("SUB_CODE", "CS101")
            .with("Date", "2024-01-10")
            .with("Sess", "AN")];
        let out = normalize_rows(&rows).expect("normalize");
        assert_eq!(out[0].reg_no, "2021001");
        assert_eq!(out[0].sub_code, "CS101");
    }

    #[test]
    fn numeric_cells_render_without_decimal_point() {
        let row = timetable_row("x", "CS101")
            .with("Class Code", json!(12.0))
            .with("Department", json!(3.5));
        let out = normalize_rows(&[row]).expect("normalize");
        assert_eq!(out[0].class_code, "12");
        assert_eq!(out[0].dept, "3.5");
        assert_eq!(cell_text(&json!(2021001)), "2021001");
        assert_eq!(cell_text(&serde_json::Value::Null), "");
    }

    #[test]
    fn blank_cell_in_resolved_column_is_empty_not_error() {
        let rows = vec![
            timetable_row("1", "CS101"),
            RawRow::new()
                .with("Reg No", "2")
                .with("Name of the Student", "Ravi")
                .with("Subject Code", serde_json::Value::Null)
                .with("Exam Date", "2024-01-10")
                .with("Session", "FN"),
        ];
        let out = normalize_rows(&rows).expect("normalize");
        assert_eq!(out[1].sub_code, "");
    }

    #[test]
    fn required_columns_missing_everywhere_are_reported() {
        let rows = vec![RawRow::new()
            .with("Reg No", "1")
            .with("Subject Code", "   ")
            .with("Exam Date", "2024-01-10")];
        let e = normalize_rows(&rows).expect_err("should fail");
        match e {
            SeatingError::MissingColumns(cols) => {
                assert_eq!(cols, vec!["NAME", "SUB_CODE", "SESS"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(normalize_rows(&[]).expect("normalize").is_empty());
    }
}
