//! Page-side helpers. Every script is a function expression invoked as
//! `(script)(args)` by [`crate::BrowserPage::evaluate`].

use once_cell::sync::Lazy;

/// Resolves a serialized `Locator` against the document, then against same-origin
/// iframes. Text locators prefer the innermost (shortest text) match.
const LOCATE: &str = r#"
const __textOf = (el) => String(el.innerText || el.value || el.textContent || '').trim();
const __visible = (el) => {
  if (!el || !el.getBoundingClientRect) return false;
  const rect = el.getBoundingClientRect();
  const view = el.ownerDocument.defaultView || window;
  const style = view.getComputedStyle(el);
  return rect.width > 0 && rect.height > 0
    && style.visibility !== 'hidden' && style.display !== 'none';
};
const __find = (loc, root) => {
  if (loc.css !== undefined) {
    try { return Array.from(root.querySelectorAll(loc.css)); } catch (e) { return []; }
  }
  if (loc.text) {
    const needle = String(loc.text.contains || '').toLowerCase();
    if (!needle) return [];
    const scope = loc.text.within || 'a,button,input[type=submit],span,div';
    let nodes = [];
    try { nodes = Array.from(root.querySelectorAll(scope)); } catch (e) { return []; }
    return nodes
      .filter((el) => __textOf(el).toLowerCase().includes(needle))
      .sort((a, b) => __textOf(a).length - __textOf(b).length);
  }
  return [];
};
const __locate = (loc) => {
  const roots = [{ doc: document, dx: 0, dy: 0 }];
  for (const frame of Array.from(document.querySelectorAll('iframe'))) {
    try {
      if (frame.contentDocument) {
        const r = frame.getBoundingClientRect();
        roots.push({ doc: frame.contentDocument, dx: r.left, dy: r.top });
      }
    } catch (e) {}
  }
  let fallback = null;
  for (const root of roots) {
    const nodes = __find(loc, root.doc);
    const shown = nodes.find(__visible);
    if (shown) return { element: shown, visible: true, dx: root.dx, dy: root.dy };
    if (!fallback && nodes.length) fallback = { element: nodes[0], visible: false, dx: root.dx, dy: root.dy };
  }
  return fallback || { element: null, visible: false, dx: 0, dy: 0 };
};
"#;

pub const READY_STATE: &str = "() => document.readyState";

pub const CURRENT_URL: &str = "() => location.href";

pub const TITLE: &str = "() => document.title";

pub const RESOURCE_COUNT: &str = "() => performance.getEntriesByType('resource').length";

/// `(locator) => {visible, x, y} | null`; coordinates are the element center.
pub static QUERY_ELEMENT: Lazy<String> = Lazy::new(|| {
    format!(
        r#"(loc) => {{
{LOCATE}
  const hit = __locate(loc);
  if (!hit.element) return null;
  const rect = hit.element.getBoundingClientRect();
  return {{
    visible: hit.visible,
    x: hit.dx + rect.left + rect.width / 2,
    y: hit.dy + rect.top + rect.height / 2,
  }};
}}"#
    )
});

/// Focuses the element and empties its value so `Input.insertText` replaces it.
pub static FOCUS_AND_CLEAR: Lazy<String> = Lazy::new(|| {
    format!(
        r#"(loc) => {{
{LOCATE}
  const el = __locate(loc).element;
  if (!el) return false;
  el.focus();
  if ('value' in el) {{
    el.value = '';
    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  }}
  return true;
}}"#
    )
});

pub static DISPATCH_CHANGE: Lazy<String> = Lazy::new(|| {
    format!(
        r#"(loc) => {{
{LOCATE}
  const el = __locate(loc).element;
  if (!el) return false;
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return true;
}}"#
    )
});

/// `(probe) => {login_form, nav_hits, intermediate}` for one `SnapshotProbe`.
pub static SNAPSHOT_PROBE: Lazy<String> = Lazy::new(|| {
    format!(
        r#"(probe) => {{
{LOCATE}
  const anyVisible = (locs) => (locs || []).some((loc) => __locate(loc).visible);
  const anyPresent = (locs) => (locs || []).some((loc) => !!__locate(loc).element);
  const body = String((document.body && document.body.innerText) || '').toLowerCase();
  let hits = 0;
  for (const loc of probe.nav_locators || []) {{
    if (__locate(loc).element) hits += 1;
  }}
  for (const label of probe.nav_labels || []) {{
    if (label && body.includes(String(label).toLowerCase())) hits += 1;
  }}
  return {{
    login_form: anyPresent(probe.login_form) || anyVisible(probe.sso_links),
    nav_hits: hits,
    intermediate: anyVisible(probe.account_inputs),
  }};
}}"#
    )
});
