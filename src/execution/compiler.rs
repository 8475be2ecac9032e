//! Turns step definitions into callable transformations

use crate::core::config::SandboxConfig;
use crate::core::{CallableStep, SourcePosition, StepDefinition, StepError, Transform};
use crate::vision::{ImageBuffer, Scoped, Vision};
use rhai::{Dynamic, Engine, EvalAltResult, Module, ParseError, Position, Scope, AST};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Compiles step code against a vision capability
///
/// Step code sees two variables, `src` (a private copy of the input image)
/// and `dst` (an empty output slot), and the vision operations under `cv::`.
pub struct StepCompiler<V: Vision> {
    vision: Arc<V>,
    engine: Arc<Engine>,
}

impl<V: Vision> StepCompiler<V> {
    pub fn new(vision: Arc<V>, sandbox: &SandboxConfig) -> Self {
        let engine = build_engine(&vision, sandbox);
        Self {
            vision,
            engine: Arc::new(engine),
        }
    }

    pub fn vision(&self) -> &Arc<V> {
        &self.vision
    }

    /// Parse `code` without running it
    pub fn check_syntax(&self, code: &str) -> Result<(), StepError> {
        self.engine.compile(code).map(|_| ()).map_err(syntax_error)
    }

    /// Compile one definition
    ///
    /// Code that does not parse yields a degraded step that passes images
    /// through unchanged.
    pub fn compile(&self, step: &StepDefinition) -> CallableStep<V::Buffer> {
        match self.engine.compile(&step.code) {
            Ok(ast) => {
                debug!("Compiled step '{}'", step.name);
                let ast = Arc::new(ast);
                let engine = Arc::clone(&self.engine);
                let vision = Arc::clone(&self.vision);
                let transform: Transform<V::Buffer> =
                    Arc::new(move |input: &V::Buffer| run(&engine, vision.as_ref(), &ast, input));
                CallableStep::new(step.id.clone(), step.name.clone(), transform)
            }
            Err(e) => {
                let error = syntax_error(e);
                warn!("Syntax error in step '{}': {}", step.name, error);
                let passthrough: Transform<V::Buffer> =
                    Arc::new(|input: &V::Buffer| Ok(input.duplicate()));
                CallableStep::degraded(step.id.clone(), &step.name, error, passthrough)
            }
        }
    }
}

fn build_engine<V: Vision>(vision: &Arc<V>, sandbox: &SandboxConfig) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(sandbox.max_operations);
    engine.set_max_call_levels(sandbox.max_call_levels);
    engine.set_max_expr_depths(sandbox.max_expr_depth, sandbox.max_expr_depth);
    engine.set_max_string_size(sandbox.max_string_size);
    engine.set_max_array_size(sandbox.max_array_size);

    engine.on_print(|text| info!(target: "step", "{}", text));
    engine.on_debug(|text, _source, pos| debug!(target: "step", "{:?}: {}", pos, text));

    register_buffer_api::<V::Buffer>(&mut engine);

    let mut cv = Module::new();
    let factory = Arc::clone(vision);
    cv.set_native_fn("Mat", move || Ok::<_, Box<EvalAltResult>>(factory.empty()));
    vision.register(&mut engine, &mut cv);
    engine.register_static_module("cv", cv.into());

    engine
}

/// Methods every buffer type offers, whatever the vision backend
fn register_buffer_api<B: ImageBuffer>(engine: &mut Engine) {
    engine.register_type_with_name::<B>("Mat");
    engine.register_fn("clone", |b: &mut B| b.duplicate());
    engine.register_fn("is_empty", |b: &mut B| b.is_empty());
    engine.register_fn("empty", |b: &mut B| b.is_empty());
    engine.register_fn("release", |b: &mut B| b.release());
    engine.register_fn("delete", |b: &mut B| b.release());
}

/// Run compiled step code on one image
fn run<V: Vision>(
    engine: &Engine,
    vision: &V,
    ast: &AST,
    input: &V::Buffer,
) -> Result<V::Buffer, StepError> {
    if input.is_released() {
        return Err(StepError::runtime("input image was already released"));
    }

    // Step code works on its own copy of the input; the caller's buffer is
    // never released or written by a step.
    let source = Scoped::new(input.duplicate());
    let slot = Scoped::new(vision.empty());
    let mut scope = Scope::new();
    scope.push("src", source.get().clone());
    scope.push("dst", slot.get().clone());

    // On error both guards release their buffers.
    let result = engine
        .eval_ast_with_scope::<Dynamic>(&mut scope, ast)
        .map_err(runtime_error)?;

    if source.get().is_released() {
        return Err(StepError::runtime("step released its input image"));
    }

    // A trailing buffer expression wins over `dst`; `dst` may have been
    // reassigned to another buffer.
    let candidate = result
        .try_cast::<V::Buffer>()
        .or_else(|| scope.get_value::<V::Buffer>("dst"))
        .unwrap_or_else(|| slot.get().clone());

    let output = if candidate.same_handle(slot.get()) {
        Scoped::new(slot.keep())
    } else if candidate.same_handle(source.get()) {
        Scoped::new(source.keep())
    } else {
        Scoped::new(candidate)
    };

    if output.get().is_released() {
        return Err(StepError::runtime("step output was released"));
    }
    if output.get().is_empty() {
        return Ok(input.duplicate());
    }
    Ok(output.keep())
}

fn position(pos: Position) -> SourcePosition {
    SourcePosition {
        line: pos.line(),
        column: pos.position(),
    }
}

fn syntax_error(e: ParseError) -> StepError {
    StepError::Syntax {
        message: e.err_type().to_string(),
        position: position(e.position()),
    }
}

fn runtime_error(mut e: Box<EvalAltResult>) -> StepError {
    let pos = e.take_position();
    StepError::Runtime {
        message: e.to_string(),
        position: position(pos),
    }
}
