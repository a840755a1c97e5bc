//! Page-side scripts evaluated through `Runtime.evaluate`.
//!
//! Elements are tagged with a `data-harvest-ref` attribute the first time a snapshot
//! sees them, and every action addresses them by that reference.

use serde_json::Value;

pub const REF_ATTRIBUTE: &str = "data-harvest-ref";

/// Returns the array consumed as `Vec<ElementSnapshot>`.
pub const SNAPSHOT: &str = r#"(() => {
  const ATTR = "data-harvest-ref";
  window.__harvestRefSeq = window.__harvestRefSeq || 0;
  const refOf = (el) => {
    if (!el.hasAttribute(ATTR)) el.setAttribute(ATTR, String(window.__harvestRefSeq++));
    return el.getAttribute(ATTR);
  };
  const cls = (el) => (el.getAttribute("class") || "").split(/\s+/).filter(Boolean);
  const isDialog = (el) =>
    el.tagName === "DIALOG" ||
    ["dialog", "alertdialog"].includes(el.getAttribute("role")) ||
    cls(el).some((c) => /modal|dialog/i.test(c) && !/backdrop|overlay/i.test(c));
  const ownText = (el) =>
    Array.from(el.childNodes)
      .filter((n) => n.nodeType === Node.TEXT_NODE)
      .map((n) => n.textContent.trim())
      .filter(Boolean)
      .join(" ");
  const visible = (el) => {
    const style = window.getComputedStyle(el);
    if (style.display === "none" || style.visibility === "hidden") return false;
    const rect = el.getBoundingClientRect();
    return rect.width > 0 || rect.height > 0;
  };
  const progressOf = (el) => {
    if (el.tagName === "PROGRESS") {
      const max = el.max || 1;
      return (el.value / max) * 100;
    }
    if (el.getAttribute("role") === "progressbar" && el.hasAttribute("aria-valuenow")) {
      const max = parseFloat(el.getAttribute("aria-valuemax") || "100") || 100;
      return (parseFloat(el.getAttribute("aria-valuenow")) / max) * 100;
    }
    if (cls(el).some((c) => /progress/i.test(c)) && el.style && el.style.width.endsWith("%")) {
      return parseFloat(el.style.width);
    }
    return null;
  };
  const dialogTitle = (el) => {
    const labelled = el.getAttribute("aria-labelledby");
    if (labelled) {
      const node = document.getElementById(labelled);
      if (node) return node.innerText.trim();
    }
    const heading = el.querySelector("h1, h2, h3, h4, [class*='title'], [class*='header']");
    return heading ? heading.innerText.trim() : (el.getAttribute("aria-label") || "");
  };
  const TAGS = ["BUTTON", "INPUT", "SELECT", "TEXTAREA", "A", "LABEL", "PROGRESS", "DIALOG", "H1", "H2", "H3", "H4"];
  const SKIP = [ATTR, "class", "style", "id"];
  const out = [];
  for (const el of document.querySelectorAll("body *")) {
    const text = ownText(el);
    const interesting =
      TAGS.includes(el.tagName) ||
      el.hasAttribute("role") ||
      isDialog(el) ||
      progressOf(el) !== null ||
      (text.length > 0 && text.length < 200);
    if (!interesting) continue;
    const dialog = el.parentElement
      ? el.parentElement.closest("dialog, [role='dialog'], [role='alertdialog'], [class*='modal'], [class*='dialog']")
      : null;
    const attributes = {};
    for (const attr of Array.from(el.attributes)) {
      if (!SKIP.includes(attr.name)) attributes[attr.name] = String(attr.value).slice(0, 120);
    }
    const label =
      el.getAttribute("aria-label") ||
      (el.labels && el.labels.length ? el.labels[0].innerText.trim() : null);
    out.push({
      handle: refOf(el),
      tag: el.tagName.toLowerCase(),
      id: el.id || null,
      classes: cls(el),
      text: (TAGS.includes(el.tagName) ? (el.innerText || "").trim() : text).slice(0, 200),
      inputType: el.tagName === "INPUT" ? (el.getAttribute("type") || "text").toLowerCase() : null,
      placeholder: el.getAttribute("placeholder"),
      label: label,
      title: el.getAttribute("title"),
      role: el.getAttribute("role"),
      value: "value" in el && typeof el.value === "string" ? el.value : null,
      disabled: !!el.disabled || el.getAttribute("aria-disabled") === "true",
      visible: visible(el),
      progress: progressOf(el),
      container: dialog ? refOf(dialog) : null,
      dialogTitle: isDialog(el) ? dialogTitle(el) : null,
      attributes: attributes,
    });
  }
  return out;
})()"#;

pub const READY_STATE: &str =
    r#"(() => document.body ? document.readyState : "loading")()"#;

const CLICK: &str = r#"((ref) => {
  const el = document.querySelector('[data-harvest-ref="' + ref + '"]');
  if (!el) return false;
  el.scrollIntoView({ block: "center" });
  el.click();
  return true;
})"#;

const SET_VALUE: &str = r#"((ref, value) => {
  const el = document.querySelector('[data-harvest-ref="' + ref + '"]');
  if (!el) return false;
  el.focus();
  const proto = el instanceof HTMLTextAreaElement
    ? HTMLTextAreaElement.prototype
    : el instanceof HTMLSelectElement
      ? HTMLSelectElement.prototype
      : HTMLInputElement.prototype;
  const setter = Object.getOwnPropertyDescriptor(proto, "value").set;
  setter.call(el, value);
  el.dispatchEvent(new Event("input", { bubbles: true }));
  el.dispatchEvent(new Event("change", { bubbles: true }));
  el.blur();
  return true;
})"#;

const READ_VALUE: &str = r#"((ref) => {
  const el = document.querySelector('[data-harvest-ref="' + ref + '"]');
  if (!el) return null;
  return typeof el.value === "string" ? el.value : (el.innerText || "").trim();
})"#;

/// Wraps a function literal in an invocation with JSON-encoded arguments.
fn invoke(function: &str, args: &[Value]) -> String {
    let rendered: Vec<String> = args.iter().map(Value::to_string).collect();
    format!("{}({})", function, rendered.join(", "))
}

pub fn click(reference: &str) -> String {
    invoke(CLICK, &[Value::from(reference)])
}

pub fn set_value(reference: &str, value: &str) -> String {
    invoke(SET_VALUE, &[Value::from(reference), Value::from(value)])
}

pub fn read_value(reference: &str) -> String {
    invoke(READ_VALUE, &[Value::from(reference)])
}
