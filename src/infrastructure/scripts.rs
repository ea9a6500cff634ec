//! 页面内执行的 JS 片段
//!
//! 元素通过 `data-harvest-ref` 属性标记，Rust 侧只持有该标记值。

use anyhow::Result;

/// 所有片段共用的标记函数
const TAG_HELPER: &str = r#"
    const __tag = (el) => {
        if (!el) return null;
        if (!el.dataset.harvestRef) {
            window.__harvestSeq = (window.__harvestSeq || 0) + 1;
            el.dataset.harvestRef = 'h' + window.__harvestSeq;
        }
        return el.dataset.harvestRef;
    };
    const __norm = (s) => (s || '').normalize('NFD').replace(/[\u0300-\u036f]/g, '')
        .toUpperCase().replace(/\s+/g, ' ').trim();
    const __visible = (el) => {
        const r = el.getBoundingClientRect();
        const st = window.getComputedStyle(el);
        return r.width > 0 && r.height > 0 && st.visibility !== 'hidden' && st.display !== 'none';
    };
"#;

/// 元素选择器
pub fn ref_selector(reference: &str) -> String {
    format!("[data-harvest-ref=\"{}\"]", reference.replace('"', ""))
}

/// 按定位方式查找元素
pub fn locate(kind: &str, value: &str) -> Result<String> {
    Ok(format!(
        r#"
        (() => {{
            {helper}
            const kind = {kind};
            const value = {value};
            const wanted = __norm(value);
            const inputs = () => Array.from(document.querySelectorAll('input, select, textarea')).filter(__visible);

            if (kind === 'css') {{
                const el = Array.from(document.querySelectorAll(value)).find(__visible);
                return __tag(el);
            }}

            if (kind === 'label') {{
                const labels = Array.from(document.querySelectorAll('label, span, div, td, th'))
                    .filter(l => l.children.length <= 2 && __norm(l.innerText).startsWith(wanted));
                for (const label of labels) {{
                    if (label.htmlFor) {{
                        const target = document.getElementById(label.htmlFor);
                        if (target && __visible(target)) return __tag(target);
                    }}
                    const inner = label.querySelector('input, select, textarea');
                    if (inner && __visible(inner)) return __tag(inner);
                    let node = label;
                    for (let depth = 0; depth < 3 && node; depth++) {{
                        const near = node.parentElement && node.parentElement.querySelector('input, select, textarea');
                        if (near && __visible(near)) return __tag(near);
                        node = node.parentElement;
                    }}
                }}
                return null;
            }}

            if (kind === 'name') {{
                const frag = value.toLowerCase();
                const el = inputs().find(i =>
                    (i.id || '').toLowerCase().includes(frag) || (i.name || '').toLowerCase().includes(frag));
                return __tag(el);
            }}

            if (kind === 'button') {{
                const candidates = Array.from(document.querySelectorAll(
                    'button, a, input[type=submit], input[type=button], [role=button]')).filter(__visible);
                const text = (el) => __norm(el.innerText || el.value || el.getAttribute('aria-label') || el.title);
                const exact = candidates.find(el => text(el) === wanted);
                return __tag(exact || candidates.find(el => text(el).includes(wanted)));
            }}

            return null;
        }})()
        "#,
        helper = TAG_HELPER,
        kind = serde_json::to_string(kind)?,
        value = serde_json::to_string(value)?,
    ))
}

/// 填写输入框，date 类型输入框自动转换为 yyyy-mm-dd
pub fn fill(reference: &str, text: &str) -> Result<String> {
    Ok(format!(
        r#"
        (() => {{
            const el = document.querySelector({selector});
            if (!el) return false;
            let value = {text};
            const m = /^(\d{{2}})\/(\d{{2}})\/(\d{{4}})$/.exec(value);
            if (el.type === 'date' && m) value = `${{m[3]}}-${{m[2]}}-${{m[1]}}`;
            el.focus();
            const setter = Object.getOwnPropertyDescriptor(Object.getPrototypeOf(el), 'value');
            if (setter && setter.set) setter.set.call(el, value); else el.value = value;
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            el.blur();
            return true;
        }})()
        "#,
        selector = serde_json::to_string(&ref_selector(reference))?,
        text = serde_json::to_string(text)?,
    ))
}

/// 资源数量稳定即视为网络空闲
pub fn network_idle(timeout_ms: u64) -> String {
    format!(
        r#"
        (async () => {{
            const timeoutMs = {timeout_ms};
            const interval = 250;
            const start = Date.now();
            let lastCount = performance.getEntriesByType('resource').length;
            let stableSince = Date.now();
            while (Date.now() - start < timeoutMs) {{
                await new Promise(r => setTimeout(r, interval));
                const curCount = performance.getEntriesByType('resource').length;
                if (curCount !== lastCount) {{
                    lastCount = curCount;
                    stableSince = Date.now();
                }} else if (document.readyState === 'complete' && Date.now() - stableSince >= 500) {{
                    return true;
                }}
            }}
            return false;
        }})()
        "#,
        timeout_ms = timeout_ms
    )
}

/// 读取结果表格（行数最多的那张表）
pub fn table_snapshot(tooltip_cap: usize, html_cap: usize) -> String {
    format!(
        r#"
        (() => {{
            {helper}
            const TOOLTIP_ATTRS = ['title', 'aria-label', 'data-original-title', 'data-bs-original-title', 'data-tooltip'];
            const tables = Array.from(document.querySelectorAll('table'));
            let table = null;
            let best = -1;
            for (const t of tables) {{
                const n = t.querySelectorAll('tbody tr').length;
                if (n > best) {{ best = n; table = t; }}
            }}
            const out = {{ url: location.href, headers: [], rows: [] }};
            if (!table) return out;

            const headRow = table.querySelector('thead tr') || table.querySelector('tr');
            if (headRow) out.headers = Array.from(headRow.querySelectorAll('th, td')).map(h => (h.innerText || '').trim());

            const tooltipsOf = (cell) => {{
                const found = [];
                const nodes = [cell, ...cell.querySelectorAll('*')];
                let inspected = 0;
                for (const node of nodes) {{
                    if (inspected >= {tooltip_cap}) break;
                    const values = TOOLTIP_ATTRS.map(a => node.getAttribute(a)).filter(Boolean);
                    if (values.length) {{
                        inspected++;
                        found.push(...values);
                    }}
                }}
                return found;
            }};

            const bodyRows = table.querySelectorAll('tbody tr');
            for (const tr of bodyRows) {{
                if (tr.querySelector('th') && !tr.querySelector('td')) continue;
                const cells = Array.from(tr.querySelectorAll('td')).map(td => ({{
                    text: (td.innerText || '').trim(),
                    tooltips: tooltipsOf(td),
                    html: (td.innerHTML || '').slice(0, {html_cap}),
                }}));
                const links = Array.from(tr.querySelectorAll('a, button, [role=button]')).map(a => ({{
                    reference: __tag(a),
                    label: (a.innerText || '').trim(),
                    href: a.getAttribute('href') ? a.href : null,
                    hint: [a.getAttribute('title'), a.getAttribute('aria-label'), a.getAttribute('data-original-title'),
                           a.className && a.className.baseVal === undefined ? a.className : '']
                        .filter(Boolean).join(' '),
                }}));
                out.rows.push({{ text: (tr.innerText || '').trim(), cells, links }});
            }}
            return out;
        }})()
        "#,
        helper = TAG_HELPER,
        tooltip_cap = tooltip_cap,
        html_cap = html_cap,
    )
}

/// 页面上所有可点击元素
pub const CLICKABLES: &str = r#"
    (() => {
        const __tagc = (el) => {
            if (!el.dataset.harvestRef) {
                window.__harvestSeq = (window.__harvestSeq || 0) + 1;
                el.dataset.harvestRef = 'h' + window.__harvestSeq;
            }
            return el.dataset.harvestRef;
        };
        const vh = window.innerHeight || document.documentElement.clientHeight || 1;
        const nodes = document.querySelectorAll('a, button, [role=button], li[onclick], span[onclick], input[type=button]');
        return Array.from(nodes).map(el => {
            const r = el.getBoundingClientRect();
            const st = window.getComputedStyle(el);
            const parent = el.parentElement;
            const cls = (typeof el.className === 'string' ? el.className : '') + ' ' +
                (parent && typeof parent.className === 'string' ? parent.className : '');
            return {
                reference: __tagc(el),
                label: (el.innerText || el.value || '').trim(),
                hint: [el.getAttribute('title'), el.getAttribute('aria-label'), cls].filter(Boolean).join(' '),
                visible: r.width > 0 && r.height > 0 && st.visibility !== 'hidden' && st.display !== 'none',
                disabled: !!el.disabled || el.getAttribute('aria-disabled') === 'true' || /\bdisabled\b/.test(cls),
                ratio: r.top / vh,
            };
        });
    })()
"#;

/// 带 cookie 的 fetch，返回 base64 内容
pub fn fetch_binary(url: &str) -> Result<String> {
    Ok(format!(
        r#"
        (async () => {{
            try {{
                const response = await fetch({url}, {{ credentials: 'include' }});
                const buf = await response.arrayBuffer();
                const bytes = new Uint8Array(buf);
                let binary = '';
                const chunk = 0x8000;
                for (let i = 0; i < bytes.length; i += chunk) {{
                    binary += String.fromCharCode.apply(null, bytes.subarray(i, i + chunk));
                }}
                return {{
                    url: response.url,
                    status: response.status,
                    contentType: response.headers.get('content-type'),
                    disposition: response.headers.get('content-disposition'),
                    body: btoa(binary),
                }};
            }} catch (error) {{
                return {{ error: error.message }};
            }}
        }})()
        "#,
        url = serde_json::to_string(url)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_selector_strips_quotes() {
        assert_eq!(ref_selector("h1\""), "[data-harvest-ref=\"h1\"]");
    }

    #[test]
    fn test_locate_embeds_escaped_arguments() {
        let js = locate("label", "Data \"Inicial\"").unwrap();
        assert!(js.contains(r#"const value = "Data \"Inicial\"";"#));
        assert!(js.contains(r#"const kind = "label";"#));
    }

    #[test]
    fn test_table_snapshot_caps_are_embedded() {
        let js = table_snapshot(15, 2000);
        assert!(js.contains("inspected >= 15"));
        assert!(js.contains("slice(0, 2000)"));
    }
}
