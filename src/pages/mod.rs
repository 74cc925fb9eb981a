use crate::api::EnvConfig;
use crate::components::ui::{
    Alert, AlertDescription, Button, ButtonSize, ButtonVariant, Flash, SearchInput, Spinner,
};
use crate::history::KeyChord;
use crate::listener::WebSocketTransport;
use crate::models::Board;
use crate::navigation::BrowserHistory;
use crate::state::page_controller::{
    DocumentChrome, FilterAnchor, PageController, PagePhase, PageServices, PageSnapshot, Rect,
    FILTER_OVERLAY_WIDTH,
};
use crate::state::AppContext;
use crate::storage::write_recent_board;
use crate::util::{browser_scheduler, browser_spawner, set_document_title, set_favicon};
use leptos::ev;
use leptos::portal::Portal;
use leptos::prelude::*;
use leptos_dom::helpers::window_event_listener;
use std::rc::Rc;
use wasm_bindgen::JsCast;

/// Element id of the overlay mount point that lives outside the page tree.
const MODAL_ROOT_ID: &str = "modal";

type Page = StoredValue<PageController, LocalStorage>;

struct BrowserChrome;

impl DocumentChrome for BrowserChrome {
    fn set_title(&self, title: &str) {
        set_document_title(title);
    }

    fn set_favicon(&self, icon: Option<&str>) {
        set_favicon(icon);
    }
}

fn rect_of(el: &web_sys::Element) -> Rect {
    let r = el.get_bounding_client_rect();
    Rect {
        left: r.left(),
        top: r.top(),
        right: r.right(),
        bottom: r.bottom(),
    }
}

/// `#modal`, created under `<body>` on first use.
fn modal_root() -> Option<web_sys::Element> {
    let doc = web_sys::window()?.document()?;
    if let Some(el) = doc.get_element_by_id(MODAL_ROOT_ID) {
        return Some(el);
    }
    let el = doc.create_element("div").ok()?;
    el.set_id(MODAL_ROOT_ID);
    doc.body()?.append_child(&el).ok()?;
    Some(el)
}

fn board_label(board: &Board) -> String {
    let title = if board.title.trim().is_empty() {
        "Untitled board"
    } else {
        board.title.as_str()
    };
    match &board.icon {
        Some(icon) => format!("{icon} {title}"),
        None => title.to_string(),
    }
}

#[component]
pub fn BoardPage() -> impl IntoView {
    let app_state = expect_context::<AppContext>().0;
    let flash = app_state.flash;
    let recent_boards = app_state.recent_boards;

    let client = Rc::new(app_state.api_client.get_untracked());
    let services = PageServices {
        store: client.clone(),
        history: client,
        notifier: Rc::new(flash),
        navigator: Rc::new(BrowserHistory),
        chrome: Rc::new(BrowserChrome),
        transport: Rc::new(WebSocketTransport::new(EnvConfig::new().ws_url)),
        spawner: browser_spawner(),
        scheduler: browser_scheduler(),
    };

    // The controller is not `Send`; views read it through a local stored value and
    // re-run whenever the generation moves.
    let generation: RwSignal<u64> = RwSignal::new(0);
    let controller = PageController::new(services);
    controller.set_render_hook(move |g| {
        let _ = generation.try_set(g);
    });
    let page: Page = StoredValue::new_local(controller);

    let snapshot = move || {
        generation.track();
        page.with_value(|c| c.snapshot())
    };

    let key_handle = window_event_listener(ev::keydown, move |ev: web_sys::KeyboardEvent| {
        let chord = KeyChord::from_event(&ev);
        let handled = page
            .try_with_value(|c| c.handle_key(&chord))
            .unwrap_or(false);
        if handled {
            ev.prevent_default();
        }
    });
    page.with_value(|c| c.mount(Some(Box::new(move || key_handle.remove()))));

    on_cleanup(move || {
        page.try_with_value(|c| c.unmount());
    });

    // Record each newly displayed board (or a rename of it) in the recents list.
    Effect::new(move |prev: Option<Option<(String, String)>>| {
        generation.track();
        let current = page.with_value(|c| {
            c.snapshot()
                .board
                .tree()
                .map(|t| (t.board().id.clone(), t.board().title.clone()))
        });
        if current != prev.flatten() {
            if let Some((id, title)) = &current {
                recent_boards.set(write_recent_board(id, title));
            }
        }
        current
    });

    view! {
        <div class="min-h-screen bg-background text-foreground">
            <div class="mx-auto flex min-h-screen w-full max-w-6xl gap-4 px-4 py-6">
                <aside class="w-60 shrink-0">
                    <div class="sticky top-6 space-y-4">
                        <a href="/" class="text-sm font-medium text-foreground">"OCTO"</a>
                        <WorkspaceSidebar page=page generation=generation />
                        <RecentBoards page=page />
                    </div>
                </aside>

                <main class="min-w-0 flex-1 space-y-4">
                    {move || {
                        let snap = snapshot();
                        snap.sync_error.map(|err| view! {
                            <Alert class="flex items-center justify-between gap-3 border-destructive/50 text-destructive">
                                <AlertDescription>{err}</AlertDescription>
                                <Button
                                    variant=ButtonVariant::Outline
                                    size=ButtonSize::Sm
                                    on:click=move |_| page.with_value(|c| c.sync_now())
                                >
                                    "Retry"
                                </Button>
                            </Alert>
                        })
                    }}

                    {move || {
                        let snap = snapshot();
                        if snap.board.tree().is_some() {
                            view! { <BoardBody page=page generation=generation /> }.into_any()
                        } else {
                            let text = match snap.phase {
                                PagePhase::Attaching => "Loading board…",
                                _ => "Select a board from the sidebar.",
                            };
                            view! {
                                <div class="flex items-center gap-2 px-4 py-8 text-sm text-muted-foreground">
                                    {snap.syncing.then(|| view! { <Spinner /> })}
                                    {text}
                                </div>
                            }
                            .into_any()
                        }
                    }}
                </main>
            </div>

            <FilterOverlay page=page generation=generation />

            {move || flash.message.get().map(|m| view! { <Flash>{m}</Flash> })}
        </div>
    }
}

#[component]
fn WorkspaceSidebar(page: Page, generation: RwSignal<u64>) -> impl IntoView {
    let entries = move || {
        generation.track();
        let PageSnapshot {
            workspace,
            identity,
            ..
        } = page.with_value(|c| c.snapshot());
        let current_board = identity.board_id().map(str::to_string);
        let current_view = identity.view_id().map(str::to_string);

        workspace
            .boards
            .iter()
            .map(|board| {
                let board_id = board.id.clone();
                let is_current = current_board.as_deref() == Some(board.id.as_str());
                let label = board_label(board);

                let views = workspace
                    .views_of(&board.id)
                    .map(|v| {
                        let view_id = v.id.clone();
                        let owner_id = v.board_id.clone();
                        let active = is_current && current_view.as_deref() == Some(v.id.as_str());
                        let title = v.title.clone();
                        view! {
                            <Button
                                variant=if active { ButtonVariant::Active } else { ButtonVariant::Ghost }
                                size=ButtonSize::Sm
                                class="w-full justify-start text-xs"
                                on:click=move |_| page.with_value(|c| c.show_view(&view_id, Some(&owner_id)))
                            >
                                {title}
                            </Button>
                        }
                    })
                    .collect_view();

                view! {
                    <div class="space-y-0.5">
                        <Button
                            variant=if is_current { ButtonVariant::Active } else { ButtonVariant::Ghost }
                            size=ButtonSize::Sm
                            class="w-full justify-start"
                            on:click=move |_| page.with_value(|c| c.show_board(&board_id))
                        >
                            <span class="truncate">{label}</span>
                        </Button>
                        <div class="ml-4 space-y-0.5">{views}</div>
                    </div>
                }
            })
            .collect_view()
    };

    view! {
        <div class="space-y-1">
            <div class="px-2 text-xs font-medium text-muted-foreground">"Boards"</div>
            {entries}
        </div>
    }
}

#[component]
fn RecentBoards(page: Page) -> impl IntoView {
    let recent_boards = expect_context::<AppContext>().0.recent_boards;

    view! {
        <Show when=move || !recent_boards.get().is_empty() fallback=|| ().into_view()>
            <div class="space-y-1">
                <div class="px-2 text-xs font-medium text-muted-foreground">"Recent"</div>
                {move || {
                    recent_boards
                        .get()
                        .into_iter()
                        .map(|r| {
                            let id = r.id.clone();
                            view! {
                                <Button
                                    variant=ButtonVariant::Ghost
                                    size=ButtonSize::Sm
                                    class="w-full justify-start text-xs"
                                    on:click=move |_| page.with_value(|c| c.show_board(&id))
                                >
                                    <span class="truncate">{r.title}</span>
                                </Button>
                            }
                        })
                        .collect_view()
                }}
            </div>
        </Show>
    }
}

#[component]
fn BoardBody(page: Page, generation: RwSignal<u64>) -> impl IntoView {
    let snapshot = move || {
        generation.track();
        page.with_value(|c| c.snapshot())
    };

    let header = move || {
        let snap = snapshot();
        let tree = snap.board.tree()?;
        Some((board_label(tree.board()), snap.syncing))
    };

    let tabs = move || {
        let snap = snapshot();
        let Some(tree) = snap.board.tree() else {
            return ().into_any();
        };
        let active_id = tree.active_view().id.clone();
        tree.views()
            .iter()
            .map(|v| {
                let view_id = v.id.clone();
                let active = v.id == active_id;
                let title = v.title.clone();
                view! {
                    <Button
                        variant=if active { ButtonVariant::Active } else { ButtonVariant::Ghost }
                        size=ButtonSize::Sm
                        on:click=move |_| page.with_value(|c| c.show_view(&view_id, None))
                    >
                        {title}
                    </Button>
                }
            })
            .collect_view()
            .into_any()
    };

    let search_text = Signal::derive(move || {
        snapshot()
            .board
            .tree()
            .and_then(|t| t.search_text().map(str::to_string))
            .unwrap_or_default()
    });
    let on_search = Callback::new(move |text: String| {
        page.with_value(|c| c.set_search_text(Some(text)));
    });

    let on_filter = move |ev: web_sys::MouseEvent| {
        if page.with_value(|c| c.snapshot().filter.is_some()) {
            page.with_value(|c| c.show_filter(None));
            return;
        }
        let anchor = ev
            .current_target()
            .and_then(|t| t.dyn_into::<web_sys::Element>().ok());
        let body = web_sys::window()
            .and_then(|w| w.document())
            .and_then(|d| d.body());
        if let (Some(anchor), Some(body)) = (anchor, body) {
            let anchor = FilterAnchor {
                anchor: rect_of(&anchor),
                body: rect_of(&body),
            };
            page.with_value(|c| c.show_filter(Some(anchor)));
        }
    };

    let cards = move || {
        let snap = snapshot();
        let Some(tree) = snap.board.tree() else {
            return ().into_any();
        };
        let visible = tree.visible_cards();
        if visible.is_empty() {
            return view! { <div class="text-sm text-muted-foreground">"No cards."</div> }
                .into_any();
        }
        visible
            .into_iter()
            .map(|card| {
                let icon = card.icon.clone().unwrap_or_default();
                let title = if card.title.trim().is_empty() {
                    "Untitled".to_string()
                } else {
                    card.title.clone()
                };
                view! {
                    <div class="flex items-center gap-2 rounded-md border border-border bg-background px-3 py-2 text-sm">
                        <span>{icon}</span>
                        <span class="truncate">{title}</span>
                    </div>
                }
            })
            .collect_view()
            .into_any()
    };

    view! {
        <div class="space-y-4">
            <div class="flex items-center justify-between gap-3">
                <h1 class="truncate text-lg font-semibold">
                    {move || header().map(|(label, _)| label)}
                </h1>
                <div class="flex items-center gap-2">
                    {move || header().and_then(|(_, syncing)| syncing.then(|| view! { <Spinner /> }))}
                    <Button
                        variant=ButtonVariant::Outline
                        size=ButtonSize::Sm
                        on:click=move |_| page.with_value(|c| c.sync_now())
                        attr:title="Refresh"
                    >
                        "Refresh"
                    </Button>
                </div>
            </div>

            <div class="flex flex-wrap items-center gap-1">{tabs}</div>

            <div class="flex items-center gap-2">
                <div class="min-w-0 flex-1">
                    <SearchInput placeholder="Search cards…" value=search_text on_input=on_search />
                </div>
                <Button variant=ButtonVariant::Outline size=ButtonSize::Sm on:click=on_filter>
                    "Filter"
                </Button>
            </div>

            <div class="grid gap-2">{cards}</div>
        </div>
    }
}

/// Rendered into `#modal`; nothing is left there while no anchor is set.
#[component]
fn FilterOverlay(page: Page, generation: RwSignal<u64>) -> impl IntoView {
    move || {
        generation.track();
        let snap = page.with_value(|c| c.snapshot());
        let placement = snap.filter?.placement();
        let tree = snap.board.tree()?.clone();
        let mount = modal_root()?;

        let style = format!(
            "left: {}px; top: {}px; width: {}px;",
            placement.page_x, placement.page_y, FILTER_OVERLAY_WIDTH
        );
        let view_title = tree.active_view().title.clone();
        let summary = format!(
            "Showing {} of {} cards",
            tree.visible_cards().len(),
            tree.cards().len()
        );

        Some(view! {
            <Portal mount=mount>
                <div
                    class="fixed inset-0 z-40"
                    on:click=move |_| page.with_value(|c| c.show_filter(None))
                />
                <div
                    data-name="FilterOverlay"
                    class="absolute z-50 space-y-3 rounded-md border border-border bg-background p-4 shadow-lg"
                    style=style.clone()
                >
                    <div class="text-sm font-medium">{format!("Filter: {}", view_title)}</div>
                    <div class="text-xs text-muted-foreground">{summary.clone()}</div>
                    <Button
                        variant=ButtonVariant::Ghost
                        size=ButtonSize::Sm
                        on:click=move |_| page.with_value(|c| c.show_filter(None))
                    >
                        "Close"
                    </Button>
                </div>
            </Portal>
        })
    }
}
