//! Component extraction: forms, inputs, buttons, and tables from raw markup.
//!
//! Detection is attribute-level regex matching, not a tree parse — good
//! enough to locate interactive elements and derive best-effort selectors.
//! Each form collects its nested inputs and submit-capable buttons and gets
//! an inferred human-readable purpose (from id/name/action keywords and the
//! shape of its fields) so it can be retrieved by natural-language intent
//! rather than literal labels. Tables are flattened to pipe-delimited rows.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::{ComponentMetadata, ComponentType, DomComponent};
use crate::structure::strip_tags;

static FORM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<form\b([^>]*)>(.*?)</form\s*>").expect("valid form regex"));
static INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<input\b([^>]*)>").expect("valid input regex"));
static FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(select|textarea)\b([^>]*)>").expect("valid field regex")
});
static BUTTON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<button\b([^>]*)>(.*?)</button\s*>").expect("valid button regex")
});
static TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<table\b([^>]*)>(.*?)</table\s*>").expect("valid table regex")
});
static ROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr\s*>").expect("valid row regex"));
static CELL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<t[hd][^>]*>(.*?)</t[hd]\s*>").expect("valid cell regex"));
static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<label\b([^>]*)>(.*?)</label\s*>").expect("valid label regex")
});
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)([a-zA-Z][a-zA-Z0-9_:.-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>"']+))"#)
        .expect("valid attribute regex")
});

/// Parse the attribute string of an opening tag into a lowercase-keyed map.
fn parse_attrs(attr_str: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    for caps in ATTR_RE.captures_iter(attr_str) {
        let key = caps[1].to_ascii_lowercase();
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .or_else(|| caps.get(4))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        attrs.insert(key, value);
    }
    attrs
}

/// Whether a valueless boolean attribute like `required` appears in the tag.
fn has_flag(attr_str: &str, flag: &str) -> bool {
    attr_str
        .split(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .any(|token| token.eq_ignore_ascii_case(flag))
}

/// Map of `label[for=…]` targets to their stripped label text.
fn collect_labels(markup: &str) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    for caps in LABEL_RE.captures_iter(markup) {
        let attrs = parse_attrs(&caps[1]);
        if let Some(target) = attrs.get("for") {
            let text = strip_tags(&caps[2]);
            if !text.is_empty() {
                labels.insert(target.clone(), text);
            }
        }
    }
    labels
}

/// Detect interactive and structural components in raw markup.
///
/// Returns forms followed by their fields and buttons (linked via
/// `metadata.form_ref`), then standalone buttons, then tables. Selectors are
/// best-effort, not guaranteed unique.
pub fn extract_components(markup: &str) -> Vec<DomComponent> {
    let labels = collect_labels(markup);
    let mut components = Vec::new();
    let mut form_ranges: Vec<Range<usize>> = Vec::new();

    for (form_idx, caps) in FORM_RE.captures_iter(markup).enumerate() {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        form_ranges.push(whole);
        let attr_str = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let attrs = parse_attrs(attr_str);

        let selector = if let Some(id) = attrs.get("id").filter(|v| !v.is_empty()) {
            format!("#{}", id)
        } else if let Some(name) = attrs.get("name").filter(|v| !v.is_empty()) {
            format!("form[name=\"{}\"]", name)
        } else {
            format!("form:nth-of-type({})", form_idx + 1)
        };

        let fields = extract_form_fields(body, &selector, &labels);
        let buttons = extract_form_buttons(body, &selector);
        let purpose = infer_form_purpose(&attrs, &fields);

        components.push(DomComponent {
            component_type: ComponentType::Form,
            id: attrs.get("id").cloned(),
            selector: selector.clone(),
            attributes: attrs,
            text_content: strip_tags(body),
            metadata: ComponentMetadata {
                interactive: true,
                form_ref: None,
                required: false,
                placeholder: None,
                label: None,
                purpose: Some(purpose),
            },
        });
        components.extend(fields);
        components.extend(buttons);
    }

    // Buttons outside any form.
    for (idx, caps) in BUTTON_RE.captures_iter(markup).enumerate() {
        let range = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        if form_ranges.iter().any(|r| r.contains(&range.start)) {
            continue;
        }
        let attrs = parse_attrs(caps.get(1).map(|m| m.as_str()).unwrap_or_default());
        let text = strip_tags(caps.get(2).map(|m| m.as_str()).unwrap_or_default());
        let text = if text.is_empty() {
            attrs.get("value").cloned().unwrap_or_default()
        } else {
            text
        };
        let selector = if let Some(id) = attrs.get("id").filter(|v| !v.is_empty()) {
            format!("#{}", id)
        } else {
            format!("button:nth-of-type({})", idx + 1)
        };
        components.push(DomComponent {
            component_type: ComponentType::Button,
            id: attrs.get("id").cloned(),
            selector,
            attributes: attrs,
            text_content: text,
            metadata: ComponentMetadata {
                interactive: true,
                ..ComponentMetadata::default()
            },
        });
    }

    for (idx, caps) in TABLE_RE.captures_iter(markup).enumerate() {
        let attrs = parse_attrs(caps.get(1).map(|m| m.as_str()).unwrap_or_default());
        let body = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let flattened = flatten_table(body);
        if flattened.is_empty() {
            tracing::debug!(table = idx, "table with no cell content, skipping");
            continue;
        }
        let selector = if let Some(id) = attrs.get("id").filter(|v| !v.is_empty()) {
            format!("#{}", id)
        } else {
            format!("table:nth-of-type({})", idx + 1)
        };
        components.push(DomComponent {
            component_type: ComponentType::Table,
            id: attrs.get("id").cloned(),
            selector,
            attributes: attrs,
            text_content: flattened,
            metadata: ComponentMetadata::default(),
        });
    }

    components
}

fn extract_form_fields(
    body: &str,
    form_selector: &str,
    labels: &HashMap<String, String>,
) -> Vec<DomComponent> {
    let mut fields = Vec::new();
    let mut position = 0usize;

    let mut push_field = |attr_str: &str, tag: &str, fields: &mut Vec<DomComponent>| {
        let attrs = parse_attrs(attr_str);
        let input_type = attrs
            .get("type")
            .cloned()
            .unwrap_or_else(|| if tag == "input" { "text".into() } else { tag.into() });
        // Submit inputs are buttons; hidden inputs carry no user-facing meaning.
        if input_type.eq_ignore_ascii_case("submit") || input_type.eq_ignore_ascii_case("hidden") {
            return;
        }
        position += 1;
        let label = attrs
            .get("id")
            .and_then(|id| labels.get(id))
            .cloned()
            .or_else(|| attrs.get("aria-label").cloned())
            .or_else(|| attrs.get("placeholder").cloned())
            .or_else(|| attrs.get("name").map(|n| prettify_name(n)));
        let selector = if let Some(id) = attrs.get("id").filter(|v| !v.is_empty()) {
            format!("#{}", id)
        } else if let Some(name) = attrs.get("name").filter(|v| !v.is_empty()) {
            format!("{} {}[name=\"{}\"]", form_selector, tag, name)
        } else {
            format!("{} {}:nth-of-type({})", form_selector, tag, position)
        };
        let text_content = match &label {
            Some(l) => format!("{} ({})", l, input_type),
            None => input_type.clone(),
        };
        fields.push(DomComponent {
            component_type: ComponentType::InputGroup,
            id: attrs.get("id").cloned(),
            selector,
            text_content,
            metadata: ComponentMetadata {
                interactive: true,
                form_ref: Some(form_selector.to_string()),
                required: has_flag(attr_str, "required"),
                placeholder: attrs.get("placeholder").cloned(),
                label,
                purpose: None,
            },
            attributes: attrs,
        });
    };

    for caps in INPUT_RE.captures_iter(body) {
        push_field(
            caps.get(1).map(|m| m.as_str()).unwrap_or_default(),
            "input",
            &mut fields,
        );
    }
    for caps in FIELD_RE.captures_iter(body) {
        let tag = caps.get(1).map(|m| m.as_str().to_ascii_lowercase());
        push_field(
            caps.get(2).map(|m| m.as_str()).unwrap_or_default(),
            tag.as_deref().unwrap_or("select"),
            &mut fields,
        );
    }

    fields
}

fn extract_form_buttons(body: &str, form_selector: &str) -> Vec<DomComponent> {
    let mut buttons = Vec::new();
    let mut position = 0usize;

    for caps in BUTTON_RE.captures_iter(body) {
        let attr_str = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let attrs = parse_attrs(attr_str);
        // Inside a form, a button with no explicit type submits it.
        let button_type = attrs.get("type").cloned().unwrap_or_else(|| "submit".into());
        if !button_type.eq_ignore_ascii_case("submit") {
            continue;
        }
        position += 1;
        let text = strip_tags(caps.get(2).map(|m| m.as_str()).unwrap_or_default());
        let text = if text.is_empty() {
            "Submit".to_string()
        } else {
            text
        };
        let selector = if let Some(id) = attrs.get("id").filter(|v| !v.is_empty()) {
            format!("#{}", id)
        } else {
            format!("{} button:nth-of-type({})", form_selector, position)
        };
        buttons.push(DomComponent {
            component_type: ComponentType::Button,
            id: attrs.get("id").cloned(),
            selector,
            text_content: text,
            metadata: ComponentMetadata {
                interactive: true,
                form_ref: Some(form_selector.to_string()),
                ..ComponentMetadata::default()
            },
            attributes: attrs,
        });
    }

    // `<input type="submit" value="…">` counts as a submit button too.
    for caps in INPUT_RE.captures_iter(body) {
        let attr_str = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let attrs = parse_attrs(attr_str);
        if !attrs
            .get("type")
            .is_some_and(|t| t.eq_ignore_ascii_case("submit"))
        {
            continue;
        }
        position += 1;
        let text = attrs.get("value").cloned().unwrap_or_else(|| "Submit".into());
        let selector = if let Some(id) = attrs.get("id").filter(|v| !v.is_empty()) {
            format!("#{}", id)
        } else {
            format!("{} input[type=\"submit\"]", form_selector)
        };
        buttons.push(DomComponent {
            component_type: ComponentType::Button,
            id: attrs.get("id").cloned(),
            selector,
            text_content: text,
            metadata: ComponentMetadata {
                interactive: true,
                form_ref: Some(form_selector.to_string()),
                ..ComponentMetadata::default()
            },
            attributes: attrs,
        });
    }

    buttons
}

/// Flatten table markup to pipe-delimited rows, one line per `<tr>`.
fn flatten_table(body: &str) -> String {
    let mut rows = Vec::new();
    for row_caps in ROW_RE.captures_iter(body) {
        let cells: Vec<String> = CELL_RE
            .captures_iter(row_caps.get(1).map(|m| m.as_str()).unwrap_or_default())
            .map(|c| strip_tags(c.get(1).map(|m| m.as_str()).unwrap_or_default()))
            .collect();
        if cells.iter().any(|c| !c.is_empty()) {
            rows.push(cells.join(" | "));
        }
    }
    rows.join("\n")
}

/// Turn `first_name`/`firstName`-style attribute names into readable words.
fn prettify_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '_' || c == '-' {
            out.push(' ');
            prev_lower = false;
        } else if c.is_ascii_uppercase() && prev_lower {
            out.push(' ');
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_ascii_lowercase();
        }
    }
    out
}

/// Infer a human-readable purpose string for a form.
///
/// Keyword hints from id/name/action win; otherwise the shape of the field
/// set decides (name+email+date reads like a booking form, email+password
/// like a login form, and so on).
fn infer_form_purpose(attrs: &HashMap<String, String>, fields: &[DomComponent]) -> String {
    let mut haystack = String::new();
    for key in ["id", "name", "action", "class"] {
        if let Some(v) = attrs.get(key) {
            haystack.push_str(&v.to_ascii_lowercase());
            haystack.push(' ');
        }
    }

    let contains_any =
        |hay: &str, needles: &[&str]| needles.iter().any(|needle| hay.contains(needle));

    if contains_any(&haystack, &["search", "query", "find"]) {
        return "search form".to_string();
    }
    if contains_any(&haystack, &["login", "log-in", "signin", "sign-in"]) {
        return "login form".to_string();
    }
    if contains_any(&haystack, &["signup", "sign-up", "register"]) {
        return "sign-up form".to_string();
    }
    if contains_any(&haystack, &["subscribe", "newsletter"]) {
        return "newsletter subscription form".to_string();
    }
    if contains_any(&haystack, &["checkout", "payment", "billing"]) {
        return "payment form".to_string();
    }
    if contains_any(&haystack, &["book", "reservation", "appointment"]) {
        return "booking form".to_string();
    }
    if contains_any(&haystack, &["contact", "feedback", "support"]) {
        return "contact form".to_string();
    }

    // Field-shape heuristics.
    let mut field_text = String::new();
    let mut has_password = false;
    let mut has_email = false;
    let mut has_date = false;
    let mut has_textarea = false;
    for field in fields {
        if let Some(label) = &field.metadata.label {
            field_text.push_str(&label.to_ascii_lowercase());
            field_text.push(' ');
        }
        for key in ["type", "name"] {
            if let Some(v) = field.attributes.get(key) {
                field_text.push_str(&v.to_ascii_lowercase());
                field_text.push(' ');
            }
        }
        match field.attributes.get("type").map(String::as_str) {
            Some("password") => has_password = true,
            Some("email") => has_email = true,
            Some("date") => has_date = true,
            _ => {}
        }
        if field
            .attributes
            .get("type")
            .is_some_and(|t| t == "textarea")
            || field.selector.contains("textarea")
        {
            has_textarea = true;
        }
    }
    has_email = has_email || field_text.contains("email");
    has_date = has_date || field_text.contains("date");
    let has_name = field_text.contains("name");
    let has_message = has_textarea || field_text.contains("message") || field_text.contains("comment");

    if has_password {
        return "login form".to_string();
    }
    if has_name && has_email && has_date {
        return "booking form".to_string();
    }
    if has_email && has_message {
        return "contact form".to_string();
    }
    if has_email && fields.len() <= 2 {
        return "newsletter subscription form".to_string();
    }
    format!("form with {} fields", fields.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOKING_FORM: &str = r#"
        <form id="reserve" action="/reserve" method="post">
          <label for="guest">Full name</label>
          <input id="guest" name="full_name" type="text" required>
          <label for="mail">Email</label>
          <input id="mail" name="email" type="email" required>
          <label for="when">Date</label>
          <input id="when" name="visit_date" type="date">
          <button type="submit">Reserve a table</button>
        </form>
    "#;

    #[test]
    fn test_form_with_fields_and_button() {
        let components = extract_components(BOOKING_FORM);
        let form = &components[0];
        assert_eq!(form.component_type, ComponentType::Form);
        assert_eq!(form.selector, "#reserve");
        assert!(form.metadata.interactive);

        let fields: Vec<_> = components
            .iter()
            .filter(|c| c.component_type == ComponentType::InputGroup)
            .collect();
        assert_eq!(fields.len(), 3);
        assert!(fields
            .iter()
            .all(|f| f.metadata.form_ref.as_deref() == Some("#reserve")));
        assert_eq!(fields[0].metadata.label.as_deref(), Some("Full name"));
        assert!(fields[0].metadata.required);
        assert!(!fields[2].metadata.required);

        let buttons: Vec<_> = components
            .iter()
            .filter(|c| c.component_type == ComponentType::Button)
            .collect();
        assert_eq!(buttons.len(), 1);
        assert_eq!(buttons[0].text_content, "Reserve a table");
    }

    #[test]
    fn test_booking_purpose_from_field_shape() {
        let components = extract_components(BOOKING_FORM);
        // "reserve" is not a purpose keyword; name+email+date shape decides.
        assert_eq!(
            components[0].metadata.purpose.as_deref(),
            Some("booking form")
        );
    }

    #[test]
    fn test_purpose_from_action_keyword() {
        let markup = r#"<form action="/search"><input name="q" type="text"></form>"#;
        let components = extract_components(markup);
        assert_eq!(components[0].metadata.purpose.as_deref(), Some("search form"));
    }

    #[test]
    fn test_login_purpose_from_password_field() {
        let markup = r#"
            <form id="auth">
              <input name="user_email" type="email">
              <input name="pw" type="password">
            </form>
        "#;
        let components = extract_components(markup);
        assert_eq!(components[0].metadata.purpose.as_deref(), Some("login form"));
    }

    #[test]
    fn test_selector_fallback_to_structural_position() {
        let markup = "<form><input type=\"text\" name=\"a\"></form>";
        let components = extract_components(markup);
        assert_eq!(components[0].selector, "form:nth-of-type(1)");
    }

    #[test]
    fn test_standalone_button_detected() {
        let markup = r#"<button id="load-more">Load more</button>"#;
        let components = extract_components(markup);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].component_type, ComponentType::Button);
        assert_eq!(components[0].selector, "#load-more");
        assert!(components[0].metadata.form_ref.is_none());
    }

    #[test]
    fn test_form_button_not_reported_standalone() {
        let markup = r#"<form id="f"><button>Go</button></form>"#;
        let components = extract_components(markup);
        let standalone: Vec<_> = components
            .iter()
            .filter(|c| c.component_type == ComponentType::Button && c.metadata.form_ref.is_none())
            .collect();
        assert!(standalone.is_empty());
    }

    #[test]
    fn test_non_submit_button_in_form_ignored() {
        let markup = r#"<form id="f"><button type="button">Toggle</button></form>"#;
        let components = extract_components(markup);
        assert!(!components
            .iter()
            .any(|c| c.component_type == ComponentType::Button));
    }

    #[test]
    fn test_table_flattened_to_pipe_rows() {
        let markup = r#"
            <table id="prices">
              <tr><th>Plan</th><th>Price</th></tr>
              <tr><td>Basic</td><td>$10</td></tr>
            </table>
        "#;
        let components = extract_components(markup);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].component_type, ComponentType::Table);
        assert_eq!(components[0].text_content, "Plan | Price\nBasic | $10");
    }

    #[test]
    fn test_empty_table_skipped() {
        let markup = "<table><tr></tr></table>";
        assert!(extract_components(markup).is_empty());
    }

    #[test]
    fn test_hidden_inputs_skipped() {
        let markup = r#"<form id="f"><input type="hidden" name="csrf" value="x"><input type="text" name="q"></form>"#;
        let components = extract_components(markup);
        let fields: Vec<_> = components
            .iter()
            .filter(|c| c.component_type == ComponentType::InputGroup)
            .collect();
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn test_input_submit_counts_as_button() {
        let markup = r#"<form id="f"><input type="text" name="q"><input type="submit" value="Go"></form>"#;
        let components = extract_components(markup);
        let buttons: Vec<_> = components
            .iter()
            .filter(|c| c.component_type == ComponentType::Button)
            .collect();
        assert_eq!(buttons.len(), 1);
        assert_eq!(buttons[0].text_content, "Go");
    }

    #[test]
    fn test_prettify_name() {
        assert_eq!(prettify_name("full_name"), "full name");
        assert_eq!(prettify_name("visitDate"), "visit date");
    }
}
