use futures::future::LocalBoxFuture;
use std::rc::Rc;
use wasm_bindgen::JsCast;

/// Runs a callback once after `delay_ms`.
pub(crate) type Scheduler = Rc<dyn Fn(u32, Box<dyn FnOnce()>)>;

/// Runs a future on the UI event loop.
pub(crate) type Spawner = Rc<dyn Fn(LocalBoxFuture<'static, ()>)>;

pub(crate) fn now_ms() -> i64 {
    js_sys::Date::now().round() as i64
}

pub(crate) fn set_timeout(delay_ms: u32, f: Box<dyn FnOnce()>) {
    let Some(win) = web_sys::window() else {
        return;
    };
    let cb = wasm_bindgen::closure::Closure::once_into_js(move || f());
    let _ = win.set_timeout_with_callback_and_timeout_and_arguments_0(
        cb.as_ref().unchecked_ref(),
        delay_ms.min(i32::MAX as u32) as i32,
    );
}

pub(crate) fn browser_scheduler() -> Scheduler {
    Rc::new(set_timeout)
}

pub(crate) fn browser_spawner() -> Spawner {
    Rc::new(|fut: LocalBoxFuture<'static, ()>| leptos::task::spawn_local(fut))
}

/// Emoji favicon as an inline SVG data URL.
pub(crate) fn emoji_favicon_href(icon: &str) -> String {
    let svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100"><text y=".9em" font-size="90">{}</text></svg>"#,
        icon
    );
    format!("data:image/svg+xml,{}", urlencoding::encode(&svg))
}

pub(crate) fn set_document_title(title: &str) {
    if let Some(doc) = web_sys::window().and_then(|w| w.document()) {
        doc.set_title(title);
    }
}

/// Replaces every `<link rel*="icon">`; `None` falls back to the site default.
pub(crate) fn set_favicon(icon: Option<&str>) {
    let Some(doc) = web_sys::window().and_then(|w| w.document()) else {
        return;
    };

    if let Ok(existing) = doc.query_selector_all("link[rel*='icon']") {
        for i in 0..existing.length() {
            if let Some(node) = existing.item(i) {
                if let Some(parent) = node.parent_node() {
                    let _ = parent.remove_child(&node);
                }
            }
        }
    }

    let Some(icon) = icon else {
        return;
    };
    let Some(head) = doc.head() else {
        return;
    };
    let Ok(link) = doc.create_element("link") else {
        return;
    };
    let Ok(link) = link.dyn_into::<web_sys::HtmlLinkElement>() else {
        return;
    };
    link.set_rel("shortcut icon");
    link.set_type("image/svg+xml");
    link.set_href(&emoji_favicon_href(icon));
    let _ = head.append_child(&link);
}
