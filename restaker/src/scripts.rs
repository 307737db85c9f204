//! Script expressions evaluated inside pages
//!
//! Each function returns a self-contained expression. String arguments are
//! embedded as JSON literals so selectors and values cannot break out of the
//! script.

fn literal(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Text of the first `tag` element inside the first element with `class`, or
/// `null` when either is missing.
pub fn countdown_text(class: &str, tag: &str) -> String {
    format!(
        "(() => {{ const el = document.getElementsByClassName({class}).item(0); \
         if (!el) return null; \
         const inner = el.getElementsByTagName({tag}).item(0); \
         return inner ? inner.innerText : null; }})()",
        class = literal(class),
        tag = literal(tag),
    )
}

/// Whether the control matched by `selector` is disabled, or `null` when absent.
pub fn is_disabled(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (!el) return null; \
         return el.disabled === true \
           || el.getAttribute('aria-disabled') === 'true' \
           || el.classList.contains('Mui-disabled'); }})()",
        sel = literal(selector),
    )
}

/// `{ found, visible }` for the element matched by `selector`.
pub fn selector_state(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (!el) return {{ found: false, visible: false }}; \
         const style = window.getComputedStyle(el); \
         const rect = el.getBoundingClientRect(); \
         const visible = style.visibility !== 'hidden' && style.display !== 'none' \
           && rect.width > 0 && rect.height > 0; \
         return {{ found: true, visible }}; }})()",
        sel = literal(selector),
    )
}

/// Scroll the element into view and return the viewport coordinates of its
/// centre, or `null` when absent.
pub fn element_center(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (!el) return null; \
         el.scrollIntoView({{ block: 'center', inline: 'center' }}); \
         const rect = el.getBoundingClientRect(); \
         return {{ x: rect.left + rect.width / 2, y: rect.top + rect.height / 2 }}; }})()",
        sel = literal(selector),
    )
}

/// Focus the input matched by `selector` and select its content so the next
/// typed text replaces it. Returns false when absent.
pub fn focus_and_select(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({sel}); \
         if (!el) return false; \
         el.focus(); \
         if (typeof el.select === 'function') el.select(); \
         return true; }})()",
        sel = literal(selector),
    )
}

/// Click the first element under `container` whose trimmed text equals
/// `text`. Returns whether one was clicked.
pub fn click_by_text(container: &str, text: &str) -> String {
    format!(
        "(() => {{ const wanted = {text}; \
         for (const el of document.querySelectorAll({sel})) {{ \
           if (el.innerText && el.innerText.trim() === wanted) {{ el.click(); return true; }} \
         }} \
         return false; }})()",
        sel = literal(container),
        text = literal(text),
    )
}

pub const READY_STATE: &str = "document.readyState";

pub const LOCATION_HREF: &str = "location.href";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments_are_escaped() {
        let script = is_disabled(r#"button[data-x="a"]"#);
        assert!(script.contains(r#""button[data-x=\"a\"]""#));

        let script = click_by_text(".item", "it's \"quoted\"");
        assert!(script.contains(r#""it's \"quoted\"""#));
    }

    #[test]
    fn test_countdown_script_targets_class_and_tag() {
        let script = countdown_text("rebase-timer", "strong");
        assert!(script.contains(r#"getElementsByClassName("rebase-timer")"#));
        assert!(script.contains(r#"getElementsByTagName("strong")"#));
    }
}
