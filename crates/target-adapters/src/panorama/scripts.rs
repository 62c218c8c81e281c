//! Functions evaluated inside an authenticated Panorama tab.

/// `[method, params, timeoutMs]`: one `Panos.direct.run` RPC. A callback
/// whose response has a falsy `status` rejects.
pub const DIRECT_RUN: &str = r#"([method, params, timeout]) => new Promise((resolve, reject) => {
  if (typeof Panos === 'undefined' || !Panos.direct || !Panos.direct.run) {
    reject(new Error('Panos.direct.run is not available on this page'));
    return;
  }
  const timer = setTimeout(() => {
    reject(new Error(`Panos.direct.run timed out after ${timeout}ms`));
  }, timeout);
  try {
    Panos.direct.run(method, params, (result, response) => {
      clearTimeout(timer);
      if (!response || !response.status) {
        reject(new Error('RPC error: ' + JSON.stringify(result)));
      } else {
        resolve(result);
      }
    });
  } catch (e) {
    clearTimeout(timer);
    reject(e);
  }
})"#;

/// `xpath`: config API `get`, with the `<result>` element converted to JSON
/// (attributes as `@name`, repeated children as arrays).
pub const CONFIG_GET: &str = r#"(xpath) => new Promise((resolve, reject) => {
  const xhr = new XMLHttpRequest();
  xhr.open('GET', '/api/?type=config&action=get&xpath=' + encodeURIComponent(xpath), true);
  xhr.onload = () => {
    if (xhr.status !== 200) {
      reject(new Error(`config API returned HTTP ${xhr.status}`));
      return;
    }
    const doc = new DOMParser().parseFromString(xhr.responseText, 'application/xml');
    const root = doc.documentElement;
    if (!root || root.getAttribute('status') !== 'success') {
      reject(new Error('config API error: ' + xhr.responseText.slice(0, 300)));
      return;
    }
    const convert = (el) => {
      const out = {};
      for (const attr of Array.from(el.attributes || [])) out['@' + attr.name] = attr.value;
      const kids = Array.from(el.children);
      if (!kids.length) {
        const text = (el.textContent || '').trim();
        if (!Object.keys(out).length) return text;
        if (text) out['#text'] = text;
        return out;
      }
      for (const kid of kids) {
        const value = convert(kid);
        if (Object.prototype.hasOwnProperty.call(out, kid.tagName)) {
          if (!Array.isArray(out[kid.tagName])) out[kid.tagName] = [out[kid.tagName]];
          out[kid.tagName].push(value);
        } else {
          out[kid.tagName] = value;
        }
      }
      return out;
    };
    const result = root.getElementsByTagName('result')[0];
    resolve(result ? convert(result) : {});
  };
  xhr.onerror = () => reject(new Error('config API request failed'));
  xhr.send();
})"#;
