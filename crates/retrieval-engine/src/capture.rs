//! What a candidate operation hands back before extraction.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw result of one successful candidate.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Observation {
    /// Rendered structures collected by [`CAPTURE_SCRIPT`].
    Page(PageCapture),
    /// Value returned by a script call.
    Json(Value),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageCapture {
    pub url: String,
    pub title: String,
    /// Whitespace-collapsed body text, clipped to the layout's `text_limit`.
    pub text: String,
    pub table: Option<TableCapture>,
    pub cards: Vec<CardCapture>,
    pub form: Option<FormCapture>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableCapture {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellCapture>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellCapture {
    pub text: String,
    /// `href` of the first link inside the cell.
    pub href: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardCapture {
    pub id: Option<String>,
    pub cells: Vec<LabelledText>,
    pub slots: Vec<SlotCapture>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelledText {
    pub label: String,
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotCapture {
    pub name: String,
    pub text: String,
    pub href: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormCapture {
    pub classic: Vec<LabelledText>,
    pub workspace: Vec<LabelledText>,
}

/// `(layout) => PageCapture`, evaluated with a serialized `CaptureLayout`.
pub const CAPTURE_SCRIPT: &str = r#"(layout) => {
  const clean = (s) => String(s || '').replace(/\s+/g, ' ').trim();
  const textOf = (el) => clean(el ? (el.innerText || el.textContent) : '');
  const all = (root, sel) => {
    if (!root || !sel) return [];
    try { return Array.from(root.querySelectorAll(sel)); } catch (e) { return []; }
  };
  const one = (root, sel) => all(root, sel)[0] || null;

  let doc = document;
  if (layout.frame) {
    const frame = one(document, `iframe#${layout.frame}, iframe[name="${layout.frame}"]`);
    try { if (frame && frame.contentDocument) doc = frame.contentDocument; } catch (e) {}
  }
  const maxRows = layout.max_rows || 1000;
  const out = {
    url: String(location.href),
    title: String(doc.title || document.title || ''),
    text: textOf(doc.body).slice(0, layout.text_limit || 2000),
    table: null,
    cards: [],
    form: null,
  };

  if (layout.table) {
    const table = one(doc, layout.table.table);
    if (table) {
      const header = one(table, layout.table.header_row);
      const headers = header ? all(header, 'th, td').map(textOf) : [];
      const rows = all(table, layout.table.rows)
        .filter((row) => row !== header)
        .slice(0, maxRows)
        .map((row) => all(row, 'td').map((cell) => {
          const link = one(cell, 'a');
          return { text: textOf(link || cell), href: link ? link.getAttribute('href') : null };
        }));
      out.table = { headers, rows };
    }
  }

  if (layout.cards) {
    const spec = layout.cards;
    out.cards = all(doc, spec.item).slice(0, maxRows).map((item) => {
      const attr = (names) => {
        for (const name of names || []) {
          const v = item.getAttribute(name);
          if (v) return v;
        }
        return null;
      };
      const cells = all(item, spec.cells).map((cell) => {
        let label = '';
        for (const name of spec.label_attrs || []) {
          label = cell.getAttribute(name) || '';
          if (label) break;
        }
        return { label: clean(label), text: textOf(cell) };
      });
      const slots = (spec.slots || []).map((slot) => {
        const el = one(item, slot.selector);
        if (!el) return null;
        const link = el.tagName === 'A' ? el : one(el, 'a');
        return { name: slot.name, text: textOf(el), href: link ? link.getAttribute('href') : null };
      }).filter(Boolean);
      return { id: attr(spec.id_attrs), cells, slots };
    });
  }

  if (layout.form) {
    const spec = layout.form;
    const pairs = (groups, labelSel, valueOf) => groups.map((group) => ({
      label: textOf(one(group, labelSel)),
      text: valueOf(group),
    }));
    const form = one(doc, spec.form);
    const classic = form ? pairs(all(form, spec.groups), spec.label, (group) => {
      const input = one(group, spec.input);
      let value = input ? clean(input.value || input.getAttribute('value')) : '';
      for (const sel of spec.display || []) {
        if (value) break;
        value = textOf(one(group, sel));
      }
      return value;
    }) : [];
    const workspace = pairs(all(doc, spec.workspace_groups), spec.workspace_label,
      (group) => textOf(one(group, spec.workspace_value)));
    out.form = { classic, workspace };
  }
  return out;
}"#;
