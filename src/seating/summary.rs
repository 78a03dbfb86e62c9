use crate::seating::allocate::AllocationRecord;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSummary {
    pub sub_code: String,
    pub sub_title: String,
    pub total_students: usize,
    pub halls_used: usize,
}

/// Per-subject head count and distinct halls, ordered by code followed by title.
///
/// Both the export and the store-backed summary query go through this
/// function, so a freshly exported workbook and a later query agree.
pub fn summarize<'a, I>(records: I) -> Vec<AllocationSummary>
where
    I: IntoIterator<Item = &'a AllocationRecord>,
{
    let mut groups: HashMap<(&'a str, &'a str), (usize, HashSet<&'a str>)> = HashMap::new();
    for r in records {
        let entry = groups
            .entry((r.sub_code.as_str(), r.sub_title.as_str()))
            .or_default();
        entry.0 += 1;
        entry.1.insert(r.hall_key.as_str());
    }

    let mut out: Vec<AllocationSummary> = groups
        .into_iter()
        .map(|((code, title), (total, halls))| AllocationSummary {
            sub_code: code.to_string(),
            sub_title: title.to_string(),
            total_students: total,
            halls_used: halls.len(),
        })
        .collect();
    out.sort_by(|a, b| {
        let ka = format!("{}{}", a.sub_code, a.sub_title);
        let kb = format!("{}{}", b.sub_code, b.sub_title);
        ka.cmp(&kb)
            .then_with(|| a.sub_code.cmp(&b.sub_code))
            .then_with(|| a.sub_title.cmp(&b.sub_title))
    });
    out
}
