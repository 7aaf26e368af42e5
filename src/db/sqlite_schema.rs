pub const COMPETENCY_SCHEMA_SQL: &str = include_str!("../../sql/competency_schema.sql");

pub const SCHEMA_VERSION: &str = "1.0.0";

pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut prev = '\0';

    for ch in sql.chars() {
        match ch {
            '\'' if !in_double_quote && prev != '\\' => {
                in_single_quote = !in_single_quote;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
            }
            ';' if !in_single_quote && !in_double_quote => {
                push_statement(&mut statements, &current);
                current.clear();
                prev = ch;
                continue;
            }
            _ => {}
        }

        current.push(ch);
        prev = ch;
    }

    push_statement(&mut statements, &current);
    statements
}

// Comment-only lines are dropped so a leading "-- ..." header does not turn a
// statement into an empty one.
fn push_statement(out: &mut Vec<String>, raw: &str) {
    let sql = raw
        .lines()
        .filter(|line| !line.trim().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");
    let trimmed = sql.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}
