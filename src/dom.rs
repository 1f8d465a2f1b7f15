use tracing::warn;

use crate::types::PageSnapshot;

/// JavaScript injected into the page to read it into the snapshot shape.
/// NON-DESTRUCTIVE apart from tagging interactive elements with
/// sequential data-eid attributes so later steps can address them.
///
/// Every sub-extraction is wrapped so a hostile or half-loaded page
/// degrades to empty collections instead of killing the snapshot.
pub const SNAPSHOT_JS: &str = r#"
(() => {
  const out = {
    url: location.href,
    title: document.title || '',
    text_inputs: [], password_inputs: [], selects: [], textareas: [],
    file_inputs: [], buttons: [],
    text_sample: '', modal_count: 0, error_messages: []
  };
  let id = 0;
  const tag = (el) => {
    if (!el.dataset.eid) el.dataset.eid = 'e' + (id++);
    return '[data-eid="' + el.dataset.eid + '"]';
  };
  const visible = (el) => {
    if (!el.offsetParent && el.tagName !== 'BODY') return false;
    const s = getComputedStyle(el);
    return s.display !== 'none' && s.visibility !== 'hidden';
  };
  const labelFor = (el) => {
    if (el.id) {
      const l = document.querySelector('label[for="' + el.id + '"]');
      if (l && l.textContent.trim()) return l.textContent.trim().slice(0, 80);
    }
    return (el.getAttribute('aria-label') || el.placeholder || '').slice(0, 80);
  };

  try {
    for (const el of document.querySelectorAll('input, textarea, select')) {
      if (!visible(el)) continue;
      const info = {
        selector: tag(el),
        name: el.name || null,
        label: labelFor(el) || null,
        required: !!el.required || el.getAttribute('aria-required') === 'true',
        filled: !!el.value
      };
      const t = (el.type || 'text').toLowerCase();
      if (el.tagName === 'SELECT') out.selects.push(info);
      else if (el.tagName === 'TEXTAREA') out.textareas.push(info);
      else if (t === 'password') out.password_inputs.push(info);
      else if (t === 'file') out.file_inputs.push(info);
      else if (!['hidden','submit','button','checkbox','radio'].includes(t)) out.text_inputs.push(info);
    }
  } catch (e) {}

  try {
    for (const el of document.querySelectorAll('button, [role="button"], input[type="submit"], a[data-automation-id]')) {
      if (!visible(el)) continue;
      const label = (el.textContent || el.value || el.getAttribute('aria-label') || '').trim().slice(0, 60);
      if (!label && !el.getAttribute('data-automation-id')) continue;
      out.buttons.push({
        selector: tag(el),
        label: label,
        automation_id: el.getAttribute('data-automation-id')
      });
      if (out.buttons.length >= 25) break;
    }
  } catch (e) {}

  try {
    const modals = document.querySelectorAll('[aria-modal="true"], [role="dialog"], div[class*="modal"]');
    out.modal_count = [...modals].filter(visible).length;
  } catch (e) {}

  try {
    const root = [...document.querySelectorAll('[aria-modal="true"], [role="dialog"]')].find(visible) || document.body;
    out.text_sample = (root.innerText || '').replace(/\s+/g, ' ').trim().slice(0, 1500);
  } catch (e) {}

  try {
    for (const el of document.querySelectorAll('[role="alert"], [class*="error"], [data-automation-id*="error"]')) {
      if (!visible(el)) continue;
      const text = el.textContent.trim().slice(0, 150);
      if (text && !out.error_messages.includes(text)) out.error_messages.push(text);
      if (out.error_messages.length >= 10) break;
    }
  } catch (e) {}

  return JSON.stringify(out);
})()
"#;

/// Parse the injected script's output. A malformed payload degrades to a
/// minimal snapshot carrying whatever url/title the caller already knows.
pub fn parse_snapshot(raw: &str, fallback_url: &str, fallback_title: &str) -> PageSnapshot {
    match serde_json::from_str::<PageSnapshot>(raw) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(error = %err, "snapshot payload unparseable, degrading to bare snapshot");
            PageSnapshot {
                url: fallback_url.to_string(),
                title: fallback_title.to_string(),
                ..Default::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_payload() {
        let raw = r#"{
            "url": "https://jobs.example.com/login",
            "title": "Sign In",
            "text_inputs": [{"selector": "[data-eid=\"e0\"]", "name": "email", "label": "Email", "required": true, "filled": false}],
            "password_inputs": [{"selector": "[data-eid=\"e1\"]", "filled": false}],
            "buttons": [{"selector": "[data-eid=\"e2\"]", "label": "Sign In", "automation_id": "signInSubmitButton"}],
            "text_sample": "Welcome back",
            "modal_count": 1,
            "error_messages": []
        }"#;
        let snap = parse_snapshot(raw, "x", "y");
        assert_eq!(snap.url, "https://jobs.example.com/login");
        assert!(snap.has_credential_fields());
        assert!(!snap.credentials_filled());
        assert_eq!(snap.buttons[0].automation_id.as_deref(), Some("signInSubmitButton"));
        assert!(snap.modal_present());
    }

    #[test]
    fn missing_collections_default_to_empty() {
        let raw = r#"{"url": "https://jobs.example.com/", "title": "Jobs"}"#;
        let snap = parse_snapshot(raw, "x", "y");
        assert_eq!(snap.buttons.len(), 0);
        assert_eq!(snap.modal_count, 0);
    }

    #[test]
    fn garbage_degrades_to_bare_snapshot() {
        let snap = parse_snapshot("<html>not json", "https://jobs.example.com/a", "Apply");
        assert_eq!(snap.url, "https://jobs.example.com/a");
        assert_eq!(snap.title, "Apply");
        assert!(snap.buttons.is_empty());
    }
}
