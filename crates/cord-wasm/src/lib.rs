//! WebAssembly bindings for Cord page context matching

use std::sync::OnceLock;

use wasm_bindgen::prelude::*;

use cord_compiler::{build_rule_set, optimize_providers, parse_provider_document, parse_rules, Diagnostic, RuleSet, Severity};
use cord_core::{cleanup_url, match_url_against_rule as match_rule, Context, MatchResult};

static RULE_SET: OnceLock<RuleSet> = OnceLock::new();

/// Load provider JSON. Can only be called once per instance.
#[wasm_bindgen]
pub fn init(providers_json: &str) -> Result<(), JsValue> {
    if RULE_SET.get().is_some() {
        return Err(JsValue::from_str("Already initialized. Reload the page to reinitialize."));
    }

    let (rules, diagnostics) = compile_rule_set(providers_json).map_err(|e| JsValue::from_str(&e))?;
    for diagnostic in &diagnostics {
        let message = JsValue::from_str(&diagnostic.to_string());
        match diagnostic.severity {
            Severity::Error => web_sys::console::error_1(&message),
            Severity::Warning => web_sys::console::warn_1(&message),
        }
    }

    RULE_SET
        .set(rules)
        .map_err(|_| JsValue::from_str("Failed to set rule state"))?;

    Ok(())
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    RULE_SET.get().is_some()
}

#[wasm_bindgen]
pub fn get_rule_set_info() -> JsValue {
    let result = js_sys::Object::new();
    if let Some(rules) = RULE_SET.get() {
        let _ = js_sys::Reflect::set(&result, &"initialized".into(), &JsValue::from(true));
        let _ = js_sys::Reflect::set(&result, &"providers".into(), &JsValue::from(rules.providers.len() as u32));
        let _ = js_sys::Reflect::set(&result, &"rules".into(), &JsValue::from(rules.rule_count() as u32));
        if let Some(version) = &rules.version {
            let _ = js_sys::Reflect::set(&result, &"version".into(), &JsValue::from_str(version));
        }
    } else {
        let _ = js_sys::Reflect::set(&result, &"initialized".into(), &JsValue::from(false));
    }
    result.into()
}

/// Match a page URL against the loaded providers. `document` is the page
/// text used by `contains` gates.
#[wasm_bindgen]
pub fn match_url(url: &str, document: Option<String>) -> Result<JsValue, JsValue> {
    let rules = RULE_SET
        .get()
        .ok_or_else(|| JsValue::from_str("Not initialized"))?;

    let result = rules
        .match_url(url, document.as_deref())
        .map_err(|e| JsValue::from_str(&e.to_string()))?;

    Ok(match_result_to_js(&result))
}

/// Match a URL against one rule given as JSON. Returns the context, or
/// `null` when the rule does not match.
#[wasm_bindgen]
pub fn match_url_against_rule(rule_json: &str, url: &str) -> Result<JsValue, JsValue> {
    let rule = parse_rules(rule_json)
        .map_err(|e| JsValue::from_str(&e.to_string()))?
        .into_iter()
        .next()
        .ok_or_else(|| JsValue::from_str("No rule provided"))?;
    let url = cleanup_url(url).map_err(|e| JsValue::from_str(&e.to_string()))?;

    match match_rule(&rule, &url).map_err(|e| JsValue::from_str(&e.to_string()))? {
        Some(context) => Ok(context_to_js(&context)),
        None => Ok(JsValue::NULL),
    }
}

/// Normalized form of a URL, or `undefined` when it cannot be parsed.
#[wasm_bindgen]
pub fn normalize_url(url: &str) -> Option<String> {
    cleanup_url(url).ok().map(|u| u.href())
}

fn compile_rule_set(providers_json: &str) -> Result<(RuleSet, Vec<Diagnostic>), String> {
    let mut document = parse_provider_document(providers_json)
        .map_err(|e| format!("Failed to load providers: {}", e))?;
    optimize_providers(&mut document.providers);
    Ok(build_rule_set(document))
}

fn context_to_js(context: &Context) -> JsValue {
    let obj = js_sys::Object::new();
    for (key, value) in context {
        let _ = js_sys::Reflect::set(&obj, &JsValue::from_str(key), &JsValue::from_str(value));
    }
    obj.into()
}

fn match_result_to_js(result: &MatchResult) -> JsValue {
    let obj = js_sys::Object::new();
    let kind = serde_json::to_value(result.kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    let _ = js_sys::Reflect::set(&obj, &"match".into(), &JsValue::from_str(&kind));

    if let Some(rule_id) = &result.rule_id {
        let _ = js_sys::Reflect::set(&obj, &"ruleID".into(), &JsValue::from_str(rule_id));
    }
    if let Some(page) = &result.page_context {
        let page_obj = js_sys::Object::new();
        if let Some(provider_id) = &page.provider_id {
            let _ = js_sys::Reflect::set(&page_obj, &"providerID".into(), &JsValue::from_str(provider_id));
        }
        let _ = js_sys::Reflect::set(&page_obj, &"data".into(), &context_to_js(&page.data));
        let _ = js_sys::Reflect::set(&obj, &"pageContext".into(), &page_obj);
    }
    if let Some(name) = &result.page_name {
        let _ = js_sys::Reflect::set(&obj, &"pageName".into(), &JsValue::from_str(name));
    }

    obj.into()
}
