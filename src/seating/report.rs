use crate::seating::allocate::{hall_key, AllocationRecord};
use crate::seating::summary::{summarize, AllocationSummary};
use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{Cursor, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const ARTIFACT_PREFIX: &str = "seating_allocation_";
pub const ARTIFACT_EXT: &str = ".xlsx";

pub const ALLOCATION_SHEET: &str = "Allocation";
pub const SUMMARY_SHEET: &str = "Summary";
pub const ALLOCATION_ENTRY: &str = "xl/worksheets/sheet1.xml";
pub const SUMMARY_ENTRY: &str = "xl/worksheets/sheet2.xml";

pub const ALLOCATION_COLUMNS: [&str; 10] = [
    "HALL_NO",
    "SEAT_NO",
    "REG_NO",
    "NAME",
    "SUB_CODE",
    "SUB_TITLE",
    "CLASS",
    "DEPT",
    "DATE",
    "SESS",
];
pub const SUMMARY_COLUMNS: [&str; 4] = ["SUB_CODE", "SUB_TITLE", "TOTAL_STUDENTS", "HALLS_USED"];

const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PKG_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const XML_DECL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

#[derive(Debug, Clone)]
pub struct Artifact {
    pub filename: String,
    pub path: PathBuf,
    pub sha256: String,
}

enum Cell<'a> {
    Text(&'a str),
    Number(i64),
}

pub fn artifact_filename(at: DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        ARTIFACT_PREFIX,
        at.format("%Y%m%d%H%M%S"),
        ARTIFACT_EXT
    )
}

fn is_artifact_name(name: &str) -> bool {
    name.starts_with(ARTIFACT_PREFIX) && name.ends_with(ARTIFACT_EXT)
}

/// True when `s` starts with an OOXML character escape such as `_x0007_`.
fn starts_with_char_escape(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 7
        && b[0] == b'_'
        && b[1] == b'x'
        && b[2..6].iter().all(u8::is_ascii_hexdigit)
        && b[6] == b'_'
}

/// XML-escape cell text. Control characters become `_xHHHH_`, and a literal
/// `_xHHHH_` in the text has its underscore escaped as `_x005F_`.
fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, ch) in s.char_indices() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '_' if starts_with_char_escape(&s[i..]) => out.push_str("_x005F_"),
            c if (c as u32) < 0x20 && c != '\t' && c != '\n' => {
                out.push_str(&format!("_x{:04X}_", c as u32))
            }
            c => out.push(c),
        }
    }
    out
}

fn decode_char_escapes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('_') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if starts_with_char_escape(tail) {
            if let Some(c) = u32::from_str_radix(&tail[2..6], 16)
                .ok()
                .and_then(char::from_u32)
            {
                out.push(c);
                rest = &tail[7..];
                continue;
            }
        }
        out.push('_');
        rest = &tail[1..];
    }
    out.push_str(rest);
    out
}

fn xml_unescape(s: &str) -> String {
    decode_char_escapes(
        &s.replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&apos;", "'")
            .replace("&amp;", "&"),
    )
}

fn column_letter(mut idx: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (idx % 26) as u8);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

fn sheet_xml(header: &[&str], rows: &[Vec<Cell<'_>>]) -> String {
    let mut xml = String::new();
    xml.push_str(XML_DECL);
    xml.push_str(&format!(r#"<worksheet xmlns="{}"><sheetData>"#, MAIN_NS));

    let header_cells: Vec<Cell<'_>> = header.iter().map(|h| Cell::Text(h)).collect();
    for (r, cells) in std::iter::once(&header_cells).chain(rows.iter()).enumerate() {
        let row_no = r + 1;
        xml.push_str(&format!(r#"<row r="{}">"#, row_no));
        for (c, cell) in cells.iter().enumerate() {
            let at = format!("{}{}", column_letter(c), row_no);
            match cell {
                Cell::Text(t) => xml.push_str(&format!(
                    r#"<c r="{}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                    at,
                    xml_escape(t)
                )),
                Cell::Number(n) => xml.push_str(&format!(r#"<c r="{}"><v>{}</v></c>"#, at, n)),
            }
        }
        xml.push_str("</row>");
    }

    xml.push_str("</sheetData></worksheet>");
    xml
}

fn allocation_cells(r: &AllocationRecord) -> Vec<Cell<'_>> {
    vec![
        Cell::Number(r.hall_no),
        Cell::Number(r.seat_no),
        Cell::Text(&r.reg_no),
        Cell::Text(&r.name),
        Cell::Text(&r.sub_code),
        Cell::Text(&r.sub_title),
        Cell::Text(&r.class_code),
        Cell::Text(&r.dept),
        Cell::Text(&r.date),
        Cell::Text(&r.sess),
    ]
}

fn summary_cells(s: &AllocationSummary) -> Vec<Cell<'_>> {
    vec![
        Cell::Text(&s.sub_code),
        Cell::Text(&s.sub_title),
        Cell::Number(s.total_students as i64),
        Cell::Number(s.halls_used as i64),
    ]
}

fn package_parts(records: &[AllocationRecord]) -> Vec<(&'static str, String)> {
    let summary = summarize(records);
    let alloc_rows: Vec<Vec<Cell<'_>>> = records.iter().map(allocation_cells).collect();
    let summary_rows: Vec<Vec<Cell<'_>>> = summary.iter().map(summary_cells).collect();

    let content_types = format!(
        concat!(
            r#"{}<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
            r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
            r#"<Default Extension="xml" ContentType="application/xml"/>"#,
            r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
            r#"<Override PartName="/{}" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
            r#"<Override PartName="/{}" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
            r#"<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>"#,
            r#"</Types>"#
        ),
        XML_DECL, ALLOCATION_ENTRY, SUMMARY_ENTRY
    );
    let root_rels = format!(
        r#"{}<Relationships xmlns="{}"><Relationship Id="rId1" Type="{}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#,
        XML_DECL, PKG_REL_NS, REL_NS
    );
    let workbook = format!(
        r#"{}<workbook xmlns="{}" xmlns:r="{}"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/><sheet name="{}" sheetId="2" r:id="rId2"/></sheets></workbook>"#,
        XML_DECL, MAIN_NS, REL_NS, ALLOCATION_SHEET, SUMMARY_SHEET
    );
    let workbook_rels = format!(
        concat!(
            r#"{}<Relationships xmlns="{}">"#,
            r#"<Relationship Id="rId1" Type="{}/worksheet" Target="worksheets/sheet1.xml"/>"#,
            r#"<Relationship Id="rId2" Type="{}/worksheet" Target="worksheets/sheet2.xml"/>"#,
            r#"<Relationship Id="rId3" Type="{}/styles" Target="styles.xml"/>"#,
            r#"</Relationships>"#
        ),
        XML_DECL, PKG_REL_NS, REL_NS, REL_NS, REL_NS
    );
    let styles = format!(
        concat!(
            r#"{}<styleSheet xmlns="{}">"#,
            r#"<fonts count="1"><font><sz val="11"/><name val="Calibri"/></font></fonts>"#,
            r#"<fills count="2"><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill></fills>"#,
            r#"<borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>"#,
            r#"<cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>"#,
            r#"<cellXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/></cellXfs>"#,
            r#"</styleSheet>"#
        ),
        XML_DECL, MAIN_NS
    );

    vec![
        ("[Content_Types].xml", content_types),
        ("_rels/.rels", root_rels),
        ("xl/workbook.xml", workbook),
        ("xl/_rels/workbook.xml.rels", workbook_rels),
        ("xl/styles.xml", styles),
        (ALLOCATION_ENTRY, sheet_xml(&ALLOCATION_COLUMNS, &alloc_rows)),
        (SUMMARY_ENTRY, sheet_xml(&SUMMARY_COLUMNS, &summary_rows)),
    ]
}

/// Render the two-sheet workbook into memory.
pub fn render_workbook(records: &[AllocationRecord]) -> anyhow::Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, body) in package_parts(records) {
        zip.start_file(name, opts)
            .with_context(|| format!("failed to start workbook entry {}", name))?;
        zip.write_all(body.as_bytes())
            .with_context(|| format!("failed to write workbook entry {}", name))?;
    }
    let cursor = zip.finish().context("failed to finalize workbook")?;
    Ok(cursor.into_inner())
}

/// Create a not-yet-existing artifact file, stepping the timestamp forward a
/// second at a time when an earlier run already used the name.
fn claim_artifact_file(out_dir: &Path, at: DateTime<Utc>) -> anyhow::Result<(String, PathBuf, File)> {
    let mut stamp = at;
    for _ in 0..3600 {
        let filename = artifact_filename(stamp);
        let path = out_dir.join(&filename);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => return Ok((filename, path, f)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                stamp += Duration::seconds(1);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to create artifact {}", path.to_string_lossy())
                })
            }
        }
    }
    Err(anyhow!(
        "no free artifact name in {}",
        out_dir.to_string_lossy()
    ))
}

pub fn write_allocation_workbook(
    out_dir: &Path,
    records: &[AllocationRecord],
    at: DateTime<Utc>,
) -> anyhow::Result<Artifact> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create directory {}", out_dir.to_string_lossy()))?;

    let bytes = render_workbook(records)?;
    let (filename, path, mut file) = claim_artifact_file(out_dir, at)?;
    if let Err(e) = file.write_all(&bytes).and_then(|_| file.sync_all()) {
        let _ = std::fs::remove_file(&path);
        return Err(e).with_context(|| format!("failed to write artifact {}", filename));
    }

    Ok(Artifact {
        filename,
        path,
        sha256: format!("{:x}", Sha256::digest(&bytes)),
    })
}

/// Most recently modified allocation workbook in `out_dir`, if any.
pub fn latest_artifact(out_dir: &Path) -> anyhow::Result<Option<String>> {
    if !out_dir.is_dir() {
        return Ok(None);
    }
    let mut best: Option<(std::time::SystemTime, String)> = None;
    for ent in std::fs::read_dir(out_dir)
        .with_context(|| format!("failed to list {}", out_dir.to_string_lossy()))?
    {
        let ent = ent?;
        let name = ent.file_name().to_string_lossy().into_owned();
        if !is_artifact_name(&name) || !ent.path().is_file() {
            continue;
        }
        let modified = ent.metadata()?.modified()?;
        let newer = match &best {
            None => true,
            // Same mtime: the later timestamped name wins.
            Some((t, n)) => modified > *t || (modified == *t && name > *n),
        };
        if newer {
            best = Some((modified, name));
        }
    }
    Ok(best.map(|(_, name)| name))
}

/// Reject anything that is not a bare artifact file name.
pub fn resolve_artifact(out_dir: &Path, filename: &str) -> anyhow::Result<PathBuf> {
    if !is_artifact_name(filename) || filename.contains(['/', '\\']) || filename.contains("..") {
        bail!("not an allocation artifact: {}", filename);
    }
    let path = out_dir.join(filename);
    if !path.is_file() {
        bail!("artifact not found: {}", filename);
    }
    Ok(path)
}

fn cell_value(cell: &str) -> String {
    if let Some(start) = cell.find("<t") {
        let after = &cell[start..];
        let (Some(open_end), Some(close)) = (after.find('>'), after.find("</t>")) else {
            return String::new();
        };
        if open_end + 1 > close {
            return String::new();
        }
        return xml_unescape(&after[open_end + 1..close]);
    }
    if let (Some(open), Some(close)) = (cell.find("<v>"), cell.find("</v>")) {
        return xml_unescape(&cell[open + 3..close]);
    }
    String::new()
}

/// Rows of one worksheet entry as text, header row included.
///
/// This is a reader for workbooks written by `render_workbook` only: it splits
/// on the `<row` and `<c ` tags that writer emits and is not a general XLSX parser.
pub fn read_sheet_rows(path: &Path, entry: &str) -> anyhow::Result<Vec<Vec<String>>> {
    let f = File::open(path)
        .with_context(|| format!("failed to open workbook {}", path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(f).context("workbook is not a zip package")?;
    let mut xml = String::new();
    archive
        .by_name(entry)
        .with_context(|| format!("workbook has no {}", entry))?
        .read_to_string(&mut xml)
        .with_context(|| format!("failed to read {}", entry))?;

    let mut rows = Vec::new();
    for row_chunk in xml.split("<row").skip(1) {
        let row_body = row_chunk.split("</row>").next().unwrap_or("");
        let cells: Vec<String> = row_body
            .split("<c ")
            .skip(1)
            .map(|c| {
                // Self-closing <c .../> carries no value.
                let head_end = c.find('>').unwrap_or(c.len());
                if c[..head_end].ends_with('/') {
                    String::new()
                } else {
                    cell_value(c)
                }
            })
            .collect();
        rows.push(cells);
    }
    Ok(rows)
}

/// Read the `Allocation` sheet of an exported workbook back into records.
pub fn read_allocation_sheet(path: &Path) -> anyhow::Result<Vec<AllocationRecord>> {
    let rows = read_sheet_rows(path, ALLOCATION_ENTRY)?;
    let Some((header, body)) = rows.split_first() else {
        bail!("allocation sheet is empty");
    };
    if header.iter().map(String::as_str).ne(ALLOCATION_COLUMNS.iter().copied()) {
        bail!("unexpected allocation sheet header: {:?}", header);
    }

    body.iter()
        .enumerate()
        .map(|(i, cells)| -> anyhow::Result<AllocationRecord> {
            let col = |n: usize| cells.get(n).cloned().unwrap_or_default();
            let num = |n: usize| {
                col(n).trim().parse::<i64>().with_context(|| {
                    format!("row {}: {} is not a number", i + 2, ALLOCATION_COLUMNS[n])
                })
            };
            let hall_no = num(0)?;
            let date = col(8);
            let sess = col(9);
            Ok(AllocationRecord {
                hall_no,
                seat_no: num(1)?,
                reg_no: col(2),
                name: col(3),
                sub_code: col(4),
                sub_title: col(5),
                class_code: col(6),
                dept: col(7),
                hall_key: hall_key(&date, &sess, hall_no),
                date,
                sess,
            })
        })
        .collect()
}
