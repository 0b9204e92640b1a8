//! Test that all Rhai code blocks in docs/scripting.md run against the host API.
//!
//! Run with: cargo test --test scripting_docs

use std::cell::RefCell;
use std::fs;
use std::rc::Rc;

use principia::camera::PerspectiveCamera;
use principia::color::Rgb;
use principia::frame_driver::UpdateCallback;
use principia::params::{ParamValue, ParameterState};
use principia::script_api::GfxApi;
use principia::scripting::{run_setup, ScriptAnimation, ScriptLimits};
use principia::stage::{RendererInfo, Stage};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Nodes the animation snippets look up by name.
const ANIMATION_PRELUDE: &str = r#"
let orb = gfx.mesh(gfx.sphere(1), gfx.standard_material());
orb.name = "orb";
scene.add(orb);
let ring = gfx.mesh(gfx.torus(3, 0.1), gfx.basic_material(#{ color: 0xffffff }));
ring.name = "ring";
scene.add(ring);
let wave = gfx.mesh(gfx.plane(4, 4, 8, 8), gfx.standard_material());
wave.name = "wave";
scene.add(wave);
"#;

/// Extract all Rhai code blocks from markdown content
fn extract_rhai_blocks(content: &str) -> Vec<(usize, String)> {
    let mut blocks = Vec::new();
    let mut in_rhai_block = false;
    let mut current_block = String::new();
    let mut block_start_line = 0;

    for (line_num, line) in content.lines().enumerate() {
        if line.trim().starts_with("```rhai") {
            in_rhai_block = true;
            block_start_line = line_num + 1;
            current_block.clear();
        } else if in_rhai_block && line.trim() == "```" {
            in_rhai_block = false;
            blocks.push((block_start_line, current_block.clone()));
        } else if in_rhai_block {
            current_block.push_str(line);
            current_block.push('\n');
        }
    }

    blocks
}

fn is_animation_snippet(snippet: &str) -> bool {
    snippet.contains("time") || snippet.contains("params.")
}

fn fresh_stage() -> (Stage, GfxApi) {
    let stage = Stage::new(PerspectiveCamera::default(), RendererInfo::new(800, 600, 1.0));
    let gfx = GfxApi::new(
        stage.clone(),
        (Rgb::from_hex(0x00f3ff), Rgb::from_hex(0xbc13fe)),
        Rc::new(RefCell::new(StdRng::seed_from_u64(42))),
    );
    (stage, gfx)
}

fn doc_params() -> ParameterState {
    let mut params = ParameterState::new();
    params.set("speed", ParamValue::Number(1.5));
    params.set("show_ring", ParamValue::Bool(true));
    params
}

fn run_block(snippet: &str) -> Result<(), String> {
    let limits = ScriptLimits::default();
    let (stage, gfx) = fresh_stage();

    if !is_animation_snippet(snippet) {
        return run_setup(&stage, &gfx, snippet, &limits).map_err(|e| e.to_string());
    }

    run_setup(&stage, &gfx, ANIMATION_PRELUDE, &limits).map_err(|e| format!("prelude: {}", e))?;
    let animation =
        ScriptAnimation::compile(snippet, &stage, &gfx, &limits).map_err(|e| e.to_string())?;
    let params = doc_params();
    for frame in 0..3 {
        animation
            .update(frame as f32 / 60.0, &params)
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn load_blocks() -> Vec<(usize, String)> {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/docs/scripting.md");
    let content = fs::read_to_string(path).expect("Failed to read docs/scripting.md");
    extract_rhai_blocks(&content)
}

#[test]
fn test_all_rhai_blocks_run() {
    let blocks = load_blocks();
    assert!(!blocks.is_empty(), "No Rhai code blocks found in scripting.md");

    let mut errors = Vec::new();
    for (line_num, block) in &blocks {
        if let Err(err) = run_block(block) {
            errors.push(format!(
                "Block starting at line {} failed:\n{}\nError: {}",
                line_num,
                block.lines().take(3).collect::<Vec<_>>().join("\n"),
                err
            ));
        }
    }

    if !errors.is_empty() {
        panic!(
            "Found {} failing block(s) in scripting.md:\n\n{}",
            errors.len(),
            errors.join("\n\n---\n\n")
        );
    }

    println!("Successfully ran {} Rhai code blocks", blocks.len());
}

#[test]
fn test_docs_cover_both_phases() {
    let blocks = load_blocks();
    let animations = blocks.iter().filter(|(_, b)| is_animation_snippet(b)).count();
    assert!(animations >= 2);
    assert!(blocks.len() - animations >= 5);
}

#[test]
fn test_animation_snippet_mutates_named_node() {
    let limits = ScriptLimits::default();
    let (stage, gfx) = fresh_stage();
    run_setup(&stage, &gfx, ANIMATION_PRELUDE, &limits).unwrap();

    let animation = ScriptAnimation::compile(
        r#"let orb = scene.get("orb"); orb.rotation.y = time * params.speed;"#,
        &stage,
        &gfx,
        &limits,
    )
    .unwrap();
    animation.update(2.0, &doc_params()).unwrap();

    let scene = stage.scene.borrow();
    let id = scene.get_by_name("orb").unwrap();
    let rotation = scene.get(id).unwrap().transform.rotation;
    approx::assert_relative_eq!(rotation.y, 3.0);
}
