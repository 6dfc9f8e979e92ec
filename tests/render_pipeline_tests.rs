use std::sync::{Arc, Mutex};

use richtext::images::DecodeKind;
use richtext::test_utils::ScriptedPipeline;
use richtext::{
    BufferSink, ClickOutcome, Color, DisplaySink, ImageReference, LinkMode, RenderState,
    RichTextEngine, Visual,
};

fn setup(width: u32) -> (RichTextEngine, Arc<ScriptedPipeline>, Arc<BufferSink>) {
    let pipeline = ScriptedPipeline::new();
    let engine = RichTextEngine::new(pipeline.clone());
    (engine, pipeline, BufferSink::new(width))
}

const THREE_IMAGES: &str = r#"<p><img src="a.png"><img src="b.png"><img src="c.png"></p>"#;

/// Text shows up right away with placeholders; loads start on the next tick
#[test]
fn test_placeholders_shown_before_images_load() {
    let (engine, pipeline, sink) = setup(200);
    let mut render = engine.render(engine.html(THREE_IMAGES).build().unwrap());
    render.attach(&sink).unwrap();

    let text = sink.text();
    assert_eq!(text.images().len(), 3);
    assert!(text.images().iter().all(|(_, image)| matches!(
        image.slot.visual(),
        Visual::Color(c) if c == Color::LIGHT_GRAY
    )));
    assert_eq!(text.to_plain_string(), "[image][image][image]");
    assert_eq!(pipeline.issued(), 0);

    sink.run_pending();
    assert_eq!(pipeline.sources(), vec!["a.png", "b.png", "c.png"]);
    assert_eq!(render.state(), RenderState::Loading);
}

/// LOADED is reached exactly when the last image settles, whatever the order
#[test]
fn test_loaded_after_last_completion_in_any_order() {
    let (engine, pipeline, sink) = setup(200);
    let mut render = engine.render(engine.html(THREE_IMAGES).build().unwrap());
    render.attach(&sink).unwrap();
    sink.run_pending();

    assert!(pipeline.succeed(2, 100, 50));
    sink.run_pending();
    assert_eq!(render.state(), RenderState::Loading);

    assert!(pipeline.succeed(0, 100, 50));
    sink.run_pending();
    assert_eq!(render.state(), RenderState::Loading);
    assert_eq!(render.pending_loads(), 1);

    assert!(pipeline.fail(1));
    sink.run_pending();
    assert_eq!(render.state(), RenderState::Loaded);
    assert_eq!(render.pending_loads(), 0);
    assert_eq!(sink.refresh_count(), 3);

    let frozen = render.frozen_text().unwrap();
    assert_eq!(frozen.to_plain_string(), "[image 100x50][image][image 100x50]");
    assert!(engine.cached(THREE_IMAGES).is_some());

    // A completed load cannot complete again
    assert!(!pipeline.succeed(1, 10, 10));
}

/// The frozen result does not follow later writes to the live text
#[test]
fn test_frozen_text_is_a_snapshot() {
    let (engine, pipeline, sink) = setup(200);
    let mut render = engine.render(engine.html(r#"<img src="a.png">"#).build().unwrap());
    render.attach(&sink).unwrap();
    sink.run_pending();
    pipeline.succeed(0, 10, 10);
    sink.run_pending();

    let live = sink.text();
    live.images()[0].1.slot.set(Visual::Color(Color::GRAY));

    let frozen = render.frozen_text().unwrap();
    assert_eq!(frozen.to_plain_string(), "[image 10x10]");
}

/// Auto-fix keeps images inside the sink width, preserving aspect ratio
#[test]
fn test_auto_fix_scales_wide_images_to_sink_width() {
    let (engine, pipeline, sink) = setup(200);
    let source = r#"<img src="wide.png"><img src="small.png">"#;
    let mut render = engine.render(engine.html(source).build().unwrap());
    render.attach(&sink).unwrap();
    sink.run_pending();

    pipeline.succeed(0, 400, 100);
    pipeline.succeed(1, 40, 30);
    sink.run_pending();

    assert_eq!(sink.text().to_plain_string(), "[image 200x50][image 40x30]");
    assert!(pipeline.requests().iter().all(|r| r.size_override.is_none()));
}

/// A failed image shows the configured error visual
#[test]
fn test_failed_image_shows_error_visual() {
    let red = Color::rgb(0xFF, 0, 0);
    let (engine, pipeline, sink) = setup(200);
    let request = engine
        .html(r#"<img src="missing.png">"#)
        .error(Visual::Color(red))
        .build()
        .unwrap();
    let mut render = engine.render(request);
    render.attach(&sink).unwrap();
    sink.run_pending();

    pipeline.fail(0);
    sink.run_pending();

    let text = sink.text();
    assert!(matches!(text.images()[0].1.slot.visual(), Visual::Color(c) if c == red));
    assert_eq!(render.state(), RenderState::Loaded);
}

/// clear() blanks the sink and evicts the cache; attaching again reloads
#[test]
fn test_clear_then_reattach_loads_again() {
    let (engine, pipeline, sink) = setup(200);
    let mut render = engine.render(engine.html(THREE_IMAGES).build().unwrap());
    render.attach(&sink).unwrap();
    sink.run_pending();
    pipeline.succeed_all(10, 10);
    sink.run_pending();
    assert_eq!(render.state(), RenderState::Loaded);

    render.clear();
    assert_eq!(render.state(), RenderState::Ready);
    assert!(render.frozen_text().is_none());
    assert!(sink.text().is_empty());
    assert!(engine.cached(THREE_IMAGES).is_none());

    render.attach(&sink).unwrap();
    sink.run_pending();
    assert_eq!(pipeline.issued(), 6);
    assert_eq!(render.state(), RenderState::Loading);

    pipeline.succeed_all(20, 20);
    sink.run_pending();
    assert_eq!(render.state(), RenderState::Loaded);
    assert_eq!(
        sink.text().to_plain_string(),
        "[image 20x20][image 20x20][image 20x20]"
    );
}

/// clear() while loading drops the outstanding loads
#[test]
fn test_clear_cancels_pending_loads() {
    let (engine, pipeline, sink) = setup(200);
    let mut render = engine.render(engine.html(THREE_IMAGES).build().unwrap());
    render.attach(&sink).unwrap();
    sink.run_pending();

    render.clear();
    assert!((0..3).all(|i| pipeline.is_cancelled(i)));
    assert_eq!(engine.active_loads(sink.id()), 0);

    pipeline.succeed_all(10, 10);
    assert_eq!(sink.run_pending(), 0);
    assert!(sink.text().is_empty());
    assert!(engine.cached(THREE_IMAGES).is_none());
}

/// A second render of cached source is loaded at once and issues no loads
#[test]
fn test_cached_render_skips_parsing_and_loading() {
    let (engine, pipeline, sink) = setup(200);
    let mut first = engine.render(engine.html(THREE_IMAGES).build().unwrap());
    first.attach(&sink).unwrap();
    sink.run_pending();
    pipeline.succeed_all(30, 30);
    sink.run_pending();
    assert_eq!(engine.cache_len(), 1);

    let other = BufferSink::new(200);
    let mut second = engine.render(engine.html(THREE_IMAGES).build().unwrap());
    second.attach(&other).unwrap();
    other.run_pending();

    assert_eq!(second.state(), RenderState::Loaded);
    assert_eq!(pipeline.issued(), 3);
    assert_eq!(
        other.text().to_plain_string(),
        "[image 30x30][image 30x30][image 30x30]"
    );
}

/// Re-attaching a loaded render shows the frozen result without reloading
#[test]
fn test_reattach_loaded_render_reuses_result() {
    let (engine, pipeline, sink) = setup(200);
    let mut render = engine.render(engine.html(r#"<img src="a.png">"#).build().unwrap());
    render.attach(&sink).unwrap();
    sink.run_pending();
    pipeline.succeed(0, 5, 5);
    sink.run_pending();

    engine.clear_cache();
    let other = BufferSink::new(100);
    render.attach(&other).unwrap();
    other.run_pending();

    assert_eq!(pipeline.issued(), 1);
    assert_eq!(other.text().to_plain_string(), "[image 5x5]");
}

/// HTML sources share one reference; the last tag's declared size reaches
/// every occurrence
#[test]
fn test_html_duplicate_sources_share_declared_size() {
    let (engine, pipeline, sink) = setup(200);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let source = r#"<p><img src="a.png" width="99"> <img src="a.png" width="10" height="20"></p>"#;
    let request = engine
        .html(source)
        .auto_fix(false)
        .fix(move |image: &mut ImageReference, loaded: bool| {
            log.lock()
                .unwrap()
                .push((image.position(), image.declared_size(), loaded));
        })
        .build()
        .unwrap();
    let mut render = engine.render(request);
    render.attach(&sink).unwrap();
    sink.run_pending();

    assert_eq!(pipeline.issued(), 1);
    assert_eq!(pipeline.requests()[0].size_override, Some((10, 20)));

    pipeline.succeed_all(64, 64);
    sink.run_pending();

    assert_eq!(sink.text().to_plain_string(), "[image 10x20] [image 10x20]");
    assert_eq!(render.state(), RenderState::Loaded);
    assert_eq!(sink.refresh_count(), 1);
    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![(1, Some((10, 20)), false), (1, Some((10, 20)), true)]
    );
}

/// Repeating the same HTML image loads it once and fills every occurrence
#[test]
fn test_html_repeated_image_loads_once() {
    let (engine, pipeline, sink) = setup(200);
    let tag = r#"<img src="a.png" width="10" height="20">"#;
    let source = format!("<p>{tag} and {tag}</p>");
    let request = engine
        .html(source)
        .auto_fix(false)
        .fix(|_: &mut ImageReference, _: bool| {})
        .build()
        .unwrap();
    let mut render = engine.render(request);
    render.attach(&sink).unwrap();
    sink.run_pending();

    assert_eq!(pipeline.sources(), vec!["a.png"]);
    assert_eq!(render.pending_loads(), 1);

    assert!(pipeline.succeed(0, 5, 5));
    sink.run_pending();
    assert_eq!(render.state(), RenderState::Loaded);
    assert_eq!(
        render.frozen_text().unwrap().to_plain_string(),
        "[image 10x20] and [image 10x20]"
    );
}

/// Markdown gets one reference per occurrence, even for repeated sources
#[test]
fn test_markdown_duplicate_sources_are_positional() {
    let (engine, pipeline, sink) = setup(200);
    let positions = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&positions);
    let request = engine
        .markdown("![one](x.png) and ![two](x.png)")
        .auto_fix(false)
        .fix(move |image: &mut ImageReference, loaded: bool| {
            if !loaded {
                log.lock().unwrap().push(image.position());
                if image.position() == 0 {
                    image.set_size(8, 8);
                }
            }
        })
        .build()
        .unwrap();
    let mut render = engine.render(request);
    render.attach(&sink).unwrap();
    sink.run_pending();

    assert_eq!(*positions.lock().unwrap(), vec![0, 1]);
    let overrides: Vec<_> = pipeline.requests().iter().map(|r| r.size_override).collect();
    assert_eq!(overrides, vec![Some((8, 8)), None]);

    pipeline.succeed_all(30, 40);
    sink.run_pending();
    assert_eq!(sink.text().to_plain_string(), "[image 8x8] and [image 30x40]");
}

/// A fix callback can hide an image; hidden images load nothing
#[test]
fn test_fix_callback_hides_image() {
    let (engine, pipeline, sink) = setup(200);
    let request = engine
        .html(r#"<img src="ad.png"><img src="photo.png">"#)
        .auto_fix(false)
        .fix(|image: &mut ImageReference, _loaded: bool| {
            if image.source() == "ad.png" {
                image.set_visible(false);
            }
        })
        .build()
        .unwrap();
    let mut render = engine.render(request);
    render.attach(&sink).unwrap();
    sink.run_pending();

    assert_eq!(pipeline.sources(), vec!["photo.png"]);
    assert!(matches!(
        sink.text().images()[0].1.slot.visual(),
        Visual::Transparent
    ));

    pipeline.succeed(0, 3, 4);
    sink.run_pending();
    assert_eq!(render.state(), RenderState::Loaded);
    assert_eq!(sink.text().to_plain_string(), "[image 3x4]");
}

/// GIF sources, by extension or inline subtype, are decoded as animations
#[test]
fn test_gif_sources_request_animated_decode() {
    let (engine, pipeline, sink) = setup(200);
    let source = r#"<img src="anim.GIF"><img src="still.png"><img src="data:image/gif;base64,R0lGODlh"><img src=".gif">"#;
    let mut render = engine.render(engine.html(source).build().unwrap());
    render.attach(&sink).unwrap();
    sink.run_pending();

    let kinds: Vec<_> = pipeline.requests().iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            DecodeKind::Animated,
            DecodeKind::Static,
            DecodeKind::Animated,
            DecodeKind::Static,
        ]
    );
    assert_eq!(pipeline.sources()[2], "<6 bytes>");
}

/// Suppressing images replaces them with empty regions and loads nothing
#[test]
fn test_no_image_suppresses_loads() {
    let (engine, pipeline, sink) = setup(200);
    let request = engine
        .html(r#"<p>before <img src="a.png"> after</p>"#)
        .no_image(true)
        .build()
        .unwrap();
    let mut render = engine.render(request);
    render.attach(&sink).unwrap();
    sink.run_pending();

    assert_eq!(pipeline.issued(), 0);
    assert_eq!(render.state(), RenderState::Loaded);
    assert_eq!(sink.text().to_plain_string(), "before  after");
    assert_eq!(sink.text().images().len(), 1);
}

/// Binding a sink to new content cancels the loads of what it showed before
#[test]
fn test_reused_sink_drops_stale_images() {
    let (engine, pipeline, sink) = setup(200);
    let mut first = engine.render(engine.html(r#"<img src="old.png">"#).build().unwrap());
    first.attach(&sink).unwrap();
    sink.run_pending();

    let mut second = engine.render(engine.html(r#"<p>new <img src="new.png"></p>"#).build().unwrap());
    second.attach(&sink).unwrap();
    assert!(pipeline.is_cancelled(0));

    // The stale delivery goes nowhere
    pipeline.succeed(0, 99, 99);
    sink.run_pending();
    assert_eq!(sink.text().to_plain_string(), "new [image]");
    assert_eq!(first.state(), RenderState::Loading);

    pipeline.succeed(1, 7, 7);
    sink.run_pending();
    assert_eq!(sink.text().to_plain_string(), "new [image 7x7]");
    assert_eq!(second.state(), RenderState::Loaded);
    assert!(engine.cached(r#"<img src="old.png">"#).is_none());
}

/// Loads not yet issued when the sink is reused are never issued
#[test]
fn test_reuse_before_issue_skips_stale_loads() {
    let (engine, pipeline, sink) = setup(200);
    let mut first = engine.render(engine.html(THREE_IMAGES).build().unwrap());
    first.attach(&sink).unwrap();
    let mut second = engine.render(engine.html(r#"<img src="z.png">"#).build().unwrap());
    second.attach(&sink).unwrap();

    sink.run_pending();
    assert_eq!(pipeline.sources(), vec!["z.png"]);
    assert_eq!(engine.active_loads(sink.id()), 1);
}

/// A finished render holds no load handles, and a dropped sink's binding goes away
#[test]
fn test_guard_releases_loads_after_loaded_and_sink_drop() {
    let (engine, pipeline, sink) = setup(200);
    let mut render = engine.render(engine.html(THREE_IMAGES).build().unwrap());
    render.attach(&sink).unwrap();
    sink.run_pending();
    assert_eq!(engine.active_loads(sink.id()), 3);

    pipeline.succeed_all(10, 10);
    sink.run_pending();
    assert_eq!(render.state(), RenderState::Loaded);
    assert_eq!(engine.active_loads(sink.id()), 0);

    let other = BufferSink::new(200);
    let mut pending = engine.render(engine.html(r#"<img src="d.png">"#).build().unwrap());
    pending.attach(&other).unwrap();
    other.run_pending();
    let other_id = other.id();
    assert_eq!(engine.active_loads(other_id), 1);

    drop(other);
    assert_eq!(engine.active_loads(other_id), 0);
    assert!(pipeline.is_cancelled(3));
}

/// Results arriving after the sink is gone are dropped quietly
#[test]
fn test_sink_gone_before_load_completes() {
    let (engine, pipeline, sink) = setup(200);
    let mut render = engine.render(engine.html(r#"<img src="a.png">"#).build().unwrap());
    render.attach(&sink).unwrap();
    sink.run_pending();
    drop(sink);

    assert!(pipeline.succeed(0, 10, 10));
    assert_eq!(render.state(), RenderState::Loading);
    assert!(render.frozen_text().is_none());
    assert_eq!(engine.cache_len(), 0);
}

/// With click callbacks every image reports all sources and its index
#[test]
fn test_image_click_reports_sources_and_index() {
    let (engine, _pipeline, sink) = setup(200);
    let clicks = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&clicks);
    let request = engine
        .html(THREE_IMAGES)
        .image_click(move |sources: &[String], index: usize| {
            log.lock().unwrap().push((sources.to_vec(), index));
        })
        .build()
        .unwrap();
    let mut render = engine.render(request);
    render.attach(&sink).unwrap();

    assert_eq!(sink.link_mode(), LinkMode::Custom);
    let offset = sink.text().images()[1].0.start;
    assert_eq!(sink.click(offset), ClickOutcome::Handled);
    assert_eq!(
        *clicks.lock().unwrap(),
        vec![(vec!["a.png".to_string(), "b.png".to_string(), "c.png".to_string()], 1)]
    );
}

/// Link clicks go to the callback; unhandled ones fall back to opening the URL
#[test]
fn test_url_click_and_long_click() {
    let (engine, _pipeline, sink) = setup(200);
    let request = engine
        .markdown("[app](app:home) and [web](https://example.org)")
        .url_click(|url: &str| url.starts_with("app:"))
        .url_long_click(|_: &str| true)
        .build()
        .unwrap();
    let mut render = engine.render(request);
    render.attach(&sink).unwrap();

    let text = sink.text();
    let app = text.as_str().find("app").unwrap();
    let web = text.as_str().find("web").unwrap();
    assert_eq!(sink.click(app), ClickOutcome::Handled);
    assert_eq!(
        sink.click(web),
        ClickOutcome::OpenUrl("https://example.org".to_string())
    );
    assert!(sink.long_click(web));
}

/// Without callbacks links open by default; disabling clicks ignores them
#[test]
fn test_default_and_disabled_link_modes() {
    let (engine, _pipeline, sink) = setup(200);
    let source = r#"<a href="https://example.org">site</a>"#;
    let mut render = engine.render(engine.html(source).build().unwrap());
    render.attach(&sink).unwrap();
    assert_eq!(sink.link_mode(), LinkMode::Default);
    assert_eq!(
        sink.click(1),
        ClickOutcome::OpenUrl("https://example.org".to_string())
    );

    let other = BufferSink::new(200);
    let mut render = engine.render(engine.html(source).clickable(false).build().unwrap());
    render.attach(&other).unwrap();
    assert_eq!(other.link_mode(), LinkMode::None);
    assert_eq!(other.click(1), ClickOutcome::Ignored);
}

/// An image wrapped in a link reports the image click, not the link
#[test]
fn test_image_inside_html_link_reports_image_click() {
    let (engine, _pipeline, sink) = setup(200);
    let clicks = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&clicks);
    let request = engine
        .html(r#"<a href="https://x.org"><img src="a.png"></a>"#)
        .image_click(move |sources: &[String], index: usize| {
            log.lock().unwrap().push((sources.to_vec(), index));
        })
        .build()
        .unwrap();
    let mut render = engine.render(request);
    render.attach(&sink).unwrap();

    let offset = sink.text().images()[0].0.start;
    assert_eq!(sink.click(offset), ClickOutcome::Handled);
    assert_eq!(*clicks.lock().unwrap(), vec![(vec!["a.png".to_string()], 0)]);
}

/// Markdown image links behave the same way
#[test]
fn test_image_inside_markdown_link_reports_image_click() {
    let (engine, _pipeline, sink) = setup(200);
    let clicks = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&clicks);
    let request = engine
        .markdown("[![x](a.png)](https://x.org) [site](https://y.org)")
        .image_click(move |_: &[String], index: usize| {
            log.lock().unwrap().push(index);
        })
        .url_click(|_: &str| false)
        .build()
        .unwrap();
    let mut render = engine.render(request);
    render.attach(&sink).unwrap();

    let text = sink.text();
    let image = text.images()[0].0.start;
    assert_eq!(sink.click(image), ClickOutcome::Handled);
    assert_eq!(*clicks.lock().unwrap(), vec![0]);

    let site = text.as_str().find("site").unwrap();
    assert_eq!(
        sink.click(site),
        ClickOutcome::OpenUrl("https://y.org".to_string())
    );
}
