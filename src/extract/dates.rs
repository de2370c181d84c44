use regex::Regex;
use std::sync::OnceLock;

/// Field names whose values are normalized as dates
const DATE_FIELD_MARKERS: &[&str] = &["日期", "时间"];

enum Order {
    YearFirst,
    DayFirst,
}

fn patterns() -> &'static [(Regex, Order)] {
    static PATTERNS: OnceLock<Vec<(Regex, Order)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // 2025-01-09, 2025/1/9, 2025.01.09
            (
                Regex::new(r"(\d{4})[-/.](\d{1,2})[-/.](\d{1,2})").expect("static date pattern"),
                Order::YearFirst,
            ),
            (
                Regex::new(r"(\d{4})年(\d{1,2})月(\d{1,2})日").expect("static date pattern"),
                Order::YearFirst,
            ),
            // 09-01-2025
            (
                Regex::new(r"(\d{1,2})[-/.](\d{1,2})[-/.](\d{4})").expect("static date pattern"),
                Order::DayFirst,
            ),
        ]
    })
}

pub fn is_date_field(name: &str) -> bool {
    DATE_FIELD_MARKERS.iter().any(|marker| name.contains(marker))
}

/// Rewrite the first date found in `value` as `YYYY-MM-DD`
///
/// Values without a recognisable date come back trimmed but otherwise unchanged.
pub fn normalize_date(value: &str) -> String {
    let value = value.trim();
    for (pattern, order) in patterns() {
        let Some(caps) = pattern.captures(value) else {
            continue;
        };
        let (year, month, day) = match order {
            Order::YearFirst => (&caps[1], &caps[2], &caps[3]),
            Order::DayFirst => (&caps[3], &caps[2], &caps[1]),
        };
        if let (Ok(month), Ok(day)) = (month.parse::<u32>(), day.parse::<u32>()) {
            return format!("{}-{:02}-{:02}", year, month, day);
        }
    }
    value.to_string()
}
