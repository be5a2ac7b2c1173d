//! Grade-level ordering and uniform size helpers.
//!
//! Grade labels come in as free text ("7", "Grade 7", "kinder") and have to
//! sort Nursery, Kinder, Grade 1..12 rather than lexically. Uniform sets span
//! grade ranges, so visibility checks go through a name-to-range mapping
//! instead of the stored grade column.

pub const GRADE_LEVELS: &[&str] = &[
    "Nursery", "Kinder", "Grade 1", "Grade 2", "Grade 3", "Grade 4", "Grade 5", "Grade 6",
    "Grade 7", "Grade 8", "Grade 9", "Grade 10", "Grade 11", "Grade 12",
];

pub const SIZE_ORDER: &[&str] = &["XS", "S", "M", "L", "XL", "XXL"];

/// Uniform sets that cover a grade range rather than one grade.
const GRADE_MAPPINGS: &[(&str, &[&str])] = &[
    (
        "Pre-Elementary Boys Set",
        &["Kinder", "Grade 1", "Grade 2", "Grade 3"],
    ),
    (
        "Pre-Elementary Girls Set",
        &["Kinder", "Grade 1", "Grade 2", "Grade 3", "Grade 4", "Grade 5", "Grade 6"],
    ),
    ("Elementary G4-6 Boys Set", &["Grade 4", "Grade 5", "Grade 6"]),
    (
        "JHS Boys Uniform Set",
        &["Grade 7", "Grade 8", "Grade 9", "Grade 10"],
    ),
    (
        "JHS Girls Uniform Set",
        &["Grade 7", "Grade 8", "Grade 9", "Grade 10"],
    ),
    ("SHS Boys Uniform Set", &["Grade 11", "Grade 12"]),
    ("SHS Girls Uniform Set", &["Grade 11", "Grade 12"]),
    (
        "PE Uniform",
        &[
            "Kinder", "Grade 1", "Grade 2", "Grade 3", "Grade 4", "Grade 5", "Grade 6", "Grade 7",
            "Grade 8", "Grade 9", "Grade 10", "Grade 11", "Grade 12",
        ],
    ),
];

fn mapped_grades(item_name: &str) -> Option<&'static [&'static str]> {
    GRADE_MAPPINGS
        .iter()
        .find(|(name, _)| *name == item_name)
        .map(|(_, grades)| *grades)
}

/// Sort key keeping Nursery before Kinder before Grade 1..12; unknown last.
pub fn grade_order(grade_level: Option<&str>) -> i32 {
    let Some(raw) = grade_level else {
        return 999;
    };
    let g = raw.trim().to_lowercase();
    if g.is_empty() {
        return 999;
    }
    if g.contains("nursery") {
        return -1;
    }
    if g.contains("kinder") || g.contains("pre") {
        return 0;
    }
    let digits: String = g.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.parse::<i32>() {
        Ok(n) => n,
        Err(_) => 999,
    }
}

/// Canonicalize "7" / "grade 7" / "kindergarten" to the stored spelling.
pub fn normalize_grade_level(raw: &str) -> Option<String> {
    let t = raw.trim();
    if t.is_empty() {
        return None;
    }
    if t.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("Grade {}", t.trim_start_matches('0')));
    }
    let low = t.to_lowercase();
    if low.contains("grade") {
        let digits: String = t.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Some(t.to_string());
        }
        return Some(format!("Grade {}", digits));
    }
    if low.contains("kinder") {
        return Some("Kinder".to_string());
    }
    if low.contains("nursery") {
        return Some("Nursery".to_string());
    }
    Some(t.to_string())
}

/// Both spellings a stored grade may use ("Grade 7" and "7"), for matching.
pub fn grade_spellings(grade: &str) -> (String, String) {
    let full = grade.trim().to_string();
    let digits: String = full.chars().filter(|c| c.is_ascii_digit()).collect();
    let short = if digits.is_empty() { full.clone() } else { digits };
    (full, short)
}

/// Whether an item is visible to a student of `student_grade`, honoring the
/// uniform-set grade ranges. A missing student grade sees everything.
pub fn item_visible_for_grade(
    item_name: &str,
    item_grade: Option<&str>,
    student_grade: Option<&str>,
) -> bool {
    let Some(student_grade) = student_grade else {
        return true;
    };
    if let Some(grades) = mapped_grades(item_name) {
        return grades.iter().any(|g| *g == student_grade);
    }
    match item_grade {
        None => false,
        Some(g) => g.trim().eq_ignore_ascii_case(student_grade.trim()),
    }
}

/// Whether an item passes a grade filter in inventory listings.
pub fn item_matches_grade_filter(
    item_name: &str,
    item_grade: Option<&str>,
    grade_filter: &str,
) -> bool {
    if grade_filter.is_empty() {
        return true;
    }
    if let Some(grades) = mapped_grades(item_name) {
        return grades.iter().any(|g| *g == grade_filter);
    }
    match item_grade {
        None => true,
        Some(g) => g == grade_filter,
    }
}

/// Display label for an item's grade coverage ("Kinder - Grade 3").
pub fn grade_display(item_name: &str, stored_grade: Option<&str>) -> String {
    if let Some(grades) = mapped_grades(item_name) {
        if grades.len() > 3 {
            return format!("{} - {}", grades[0], grades[grades.len() - 1]);
        }
        return grades.join(", ");
    }
    stored_grade
        .map(|g| g.to_string())
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| "All".to_string())
}

pub fn size_sort_key(size_label: &str) -> usize {
    let s = size_label.trim().to_uppercase();
    SIZE_ORDER
        .iter()
        .position(|sz| *sz == s)
        .unwrap_or(SIZE_ORDER.len() + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_order_keeps_nursery_and_kinder_first() {
        assert!(grade_order(Some("Nursery")) < grade_order(Some("Kinder")));
        assert!(grade_order(Some("Kinder")) < grade_order(Some("Grade 1")));
        assert!(grade_order(Some("Grade 2")) < grade_order(Some("Grade 10")));
        assert_eq!(grade_order(None), 999);
        assert_eq!(grade_order(Some("Faculty")), 999);
    }

    #[test]
    fn normalize_accepts_bare_numbers_and_variants() {
        assert_eq!(normalize_grade_level("7").as_deref(), Some("Grade 7"));
        assert_eq!(normalize_grade_level("Grade7").as_deref(), Some("Grade 7"));
        assert_eq!(
            normalize_grade_level("kindergarten").as_deref(),
            Some("Kinder")
        );
        assert_eq!(normalize_grade_level("  nursery ").as_deref(), Some("Nursery"));
        assert_eq!(normalize_grade_level(""), None);
    }

    #[test]
    fn uniform_sets_span_grade_ranges() {
        assert!(item_visible_for_grade(
            "JHS Boys Uniform Set",
            None,
            Some("Grade 8")
        ));
        assert!(!item_visible_for_grade(
            "JHS Boys Uniform Set",
            None,
            Some("Grade 3")
        ));
        // Plain items match their stored grade only.
        assert!(item_visible_for_grade(
            "Math Workbook",
            Some("Grade 3"),
            Some("Grade 3")
        ));
        assert!(!item_visible_for_grade("Math Workbook", None, Some("Grade 3")));
        assert!(item_visible_for_grade("Math Workbook", Some("Grade 3"), None));
    }

    #[test]
    fn grade_display_collapses_long_ranges() {
        assert_eq!(
            grade_display("Pre-Elementary Girls Set", None),
            "Kinder - Grade 6"
        );
        assert_eq!(
            grade_display("SHS Boys Uniform Set", None),
            "Grade 11, Grade 12"
        );
        assert_eq!(grade_display("Math Workbook", Some("Grade 3")), "Grade 3");
        assert_eq!(grade_display("Math Workbook", None), "All");
    }

    #[test]
    fn sizes_sort_xs_to_xxl() {
        let mut sizes = vec!["XXL", "M", "xs", "L"];
        sizes.sort_by_key(|s| size_sort_key(s));
        assert_eq!(sizes, vec!["xs", "M", "L", "XXL"]);
    }
}
