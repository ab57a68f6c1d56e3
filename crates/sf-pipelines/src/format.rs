//! Plain-text renderings of API results for host views.

use serde_json::Value;

const SEPARATOR: &str = "****************************************************************************************************";

fn str_at<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(Value::as_str).unwrap_or("")
}

fn u64_at(value: &Value, pointer: &str) -> u64 {
    value.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}

/// A console message framed the way every pipeline prints results.
pub fn banner(message: &str) -> String {
    format!("{SEPARATOR}\n{message}\n{SEPARATOR}")
}

/// Coverage as a percentage; `None` when no line was measured.
pub fn coverage_percent(covered: u64, uncovered: u64) -> Option<f64> {
    let total = covered + uncovered;
    (total > 0).then(|| covered as f64 / total as f64 * 100.0)
}

/// Test method results of one run (`ApexTestResult` records).
pub fn test_result(records: &[Value]) -> String {
    let Some(first) = records.first() else {
        return "No test results".to_string();
    };

    let class_name = str_at(first, "/ApexClass/Name");
    let failures = records
        .iter()
        .filter(|r| str_at(r, "/Outcome") != "Pass")
        .count();

    let mut out = format!(
        "Test Class: {class_name}\nMethods: {}, Failures: {failures}\n\n{:<40} {:<10} {:>8}\n",
        records.len(),
        "Method",
        "Outcome",
        "Time(ms)"
    );
    for record in records {
        out.push_str(&format!(
            "{:<40} {:<10} {:>8}\n",
            str_at(record, "/MethodName"),
            str_at(record, "/Outcome"),
            u64_at(record, "/RunTime"),
        ));
        let message = str_at(record, "/Message");
        if !message.is_empty() {
            out.push_str(&format!("    {message}\n"));
        }
        let stack = str_at(record, "/StackTrace");
        if !stack.is_empty() {
            out.push_str(&format!("    {stack}\n"));
        }
    }
    out
}

/// Coverage table over `ApexCodeCoverageAggregate` records.
pub fn code_coverage(records: &[Value]) -> String {
    let mut rows: Vec<(String, u64, u64)> = records
        .iter()
        .map(|r| {
            (
                str_at(r, "/ApexClassOrTrigger/Name").to_string(),
                u64_at(r, "/NumLinesCovered"),
                u64_at(r, "/NumLinesUncovered"),
            )
        })
        .collect();
    rows.sort();

    let mut out = format!("{:<40} {:>9} {:>15}\n", "Name", "Coverage", "Lines");
    for (name, covered, uncovered) in rows {
        let percent = coverage_percent(covered, uncovered)
            .map(|p| format!("{p:.2}%"))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{name:<40} {percent:>9} {:>15}\n",
            format!("{covered}/{}", covered + uncovered)
        ));
    }
    out
}

/// Coverage line of a single class.
pub fn class_coverage(name: &str, covered: &[u64], uncovered: &[u64]) -> Option<String> {
    let percent = coverage_percent(covered.len() as u64, uncovered.len() as u64)?;
    let mut lines: Vec<String> = uncovered.iter().map(u64::to_string).collect();
    if lines.is_empty() {
        lines.push("none".to_string());
    }
    Some(format!(
        "{name}: coverage is {percent:.2}% ({}/{}), uncovered lines: {}",
        covered.len(),
        covered.len() + uncovered.len(),
        lines.join(", ")
    ))
}

/// Source with uncovered lines flagged in the gutter.
pub fn annotate_uncovered(body: &str, uncovered: &[u64]) -> String {
    body.lines()
        .enumerate()
        .map(|(index, line)| {
            let marker = if uncovered.contains(&(index as u64 + 1)) { "!!" } else { "  " };
            format!("{marker} {line}\n")
        })
        .collect()
}

/// Debug log listing.
pub fn debug_logs(records: &[Value]) -> String {
    let mut out = format!(
        "{:<20} {:<26} {:<30} {:<12} {:>10} {:>10}\n",
        "Id", "StartTime", "Request", "Status", "Length", "Duration"
    );
    for r in records {
        out.push_str(&format!(
            "{:<20} {:<26} {:<30} {:<12} {:>10} {:>10}\n",
            str_at(r, "/Id"),
            str_at(r, "/StartTime"),
            str_at(r, "/Operation"),
            str_at(r, "/Status"),
            u64_at(r, "/LogLength"),
            u64_at(r, "/DurationMilliseconds"),
        ));
    }
    out
}

/// Field table of an sobject describe.
pub fn sobject_fields(describe: &Value) -> String {
    let mut out = format!(
        "SObject: {} ({})\nKey Prefix: {}\n\n{:<40} {:<40} {:<15} {:>6}\n",
        str_at(describe, "/name"),
        str_at(describe, "/label"),
        str_at(describe, "/keyPrefix"),
        "Field",
        "Label",
        "Type",
        "Length"
    );
    let fields = describe
        .get("fields")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    for field in fields {
        out.push_str(&format!(
            "{:<40} {:<40} {:<15} {:>6}\n",
            str_at(field, "/name"),
            str_at(field, "/label"),
            str_at(field, "/type"),
            u64_at(field, "/length"),
        ));
    }
    out
}

/// Outcome of an anonymous Apex execution.
pub fn execute_anonymous(body: &Value) -> String {
    let flag = |name: &str| body.get(name).and_then(Value::as_bool).unwrap_or(false);
    if !flag("compiled") {
        return format!(
            "Compile error at line {}, column {}:\n{}",
            body.get("line").and_then(Value::as_i64).unwrap_or(-1),
            body.get("column").and_then(Value::as_i64).unwrap_or(-1),
            str_at(body, "/compileProblem"),
        );
    }
    if !flag("success") {
        return format!(
            "Runtime exception:\n{}\n{}",
            str_at(body, "/exceptionMessage"),
            str_at(body, "/exceptionStackTrace"),
        );
    }
    "Executed successfully".to_string()
}

/// Pretty JSON for views that show a raw body.
pub fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
