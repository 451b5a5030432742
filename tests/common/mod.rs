#![allow(dead_code)]

use std::error::Error;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use vklaunch::{ComputeApp, ContextError, Launch, LaunchConfig, LaunchError};

macro_rules! assert_approx_eq {
    ($i:expr, $a:expr, $b:expr, $eps:expr) => {
        assert!(
            ($a - $b).abs() < $eps,
            "assertion failed at {}: `(left ~= right)`\n  left: `{}`\n right: `{}`",
            $i,
            $a,
            $b
        );
    };
}
pub(crate) use assert_approx_eq;

pub const EPSILON: f32 = 0.1;

/// Compiles the `main` entry point of a WGSL compute shader to SPIR-V words.
pub fn compile(source: &str) -> Result<Vec<u32>, Box<dyn Error>> {
    let module = naga::front::wgsl::parse_str(source)?;
    let info = Validator::new(ValidationFlags::all(), Capabilities::PUSH_CONSTANT)
        .validate(&module)?;
    let options = naga::back::spv::Options::default();
    let pipeline = naga::back::spv::PipelineOptions {
        shader_stage: naga::ShaderStage::Compute,
        entry_point: "main".into(),
    };
    let words = naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline))?;
    Ok(words)
}

pub fn init_logger() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Runs a launch, or returns [`None`] when this machine has no usable Vulkan device.
pub fn launch(launch: Launch, config: &LaunchConfig) -> Result<Option<ComputeApp>, LaunchError> {
    init_logger();
    match ComputeApp::new(launch, config) {
        Ok(app) => Ok(Some(app)),
        Err(LaunchError::Context(
            err @ (ContextError::Loading(_)
            | ContextError::NoDeviceAvailable
            | ContextError::Vulkan(_)),
        )) => {
            log::warn!("skipping device test: {err}");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

pub const SSCAL: &str = r#"
struct Params {
    a: f32,
}

var<push_constant> params: Params;

@group(0) @binding(0) var<storage, read_write> x: array<f32>;

@compute @workgroup_size(64, 1, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if i < arrayLength(&x) {
        x[i] = params.a * x[i];
    }
}
"#;

pub const SAXPY: &str = r#"
struct Params {
    a: f32,
}

var<push_constant> params: Params;

@group(0) @binding(0) var<storage, read> x: array<f32>;
@group(0) @binding(1) var<storage, read_write> y: array<f32>;

@compute @workgroup_size(64, 1, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if i < arrayLength(&y) {
        y[i] = params.a * x[i] + y[i];
    }
}
"#;

/// Per-workgroup tree reduction of `TERM` over `0..n`, written to `partial[workgroup]`.
const REDUCE: &str = r#"
struct Params {
    n: u32,
}

var<push_constant> params: Params;

BINDINGS

var<workgroup> sums: array<f32, 64>;

@compute @workgroup_size(64, 1, 1)
fn main(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
) {
    let i = gid.x;
    var value = 0.0;
    if i < params.n {
        value = TERM;
    }
    sums[lid.x] = value;
    workgroupBarrier();

    for (var stride = 32u; stride > 0u; stride = stride / 2u) {
        if lid.x < stride {
            sums[lid.x] = sums[lid.x] + sums[lid.x + stride];
        }
        workgroupBarrier();
    }

    if lid.x == 0u {
        partial[wid.x] = sums[0];
    }
}
"#;

fn reduce(bindings: &str, term: &str) -> String {
    REDUCE.replace("BINDINGS", bindings).replace("TERM", term)
}

pub fn sdot() -> String {
    reduce(
        "@group(0) @binding(0) var<storage, read> x: array<f32>;
@group(0) @binding(1) var<storage, read> y: array<f32>;
@group(0) @binding(2) var<storage, read_write> partial: array<f32>;",
        "x[i] * y[i]",
    )
}

pub fn snrm2() -> String {
    reduce(
        "@group(0) @binding(0) var<storage, read> x: array<f32>;
@group(0) @binding(1) var<storage, read_write> partial: array<f32>;",
        "x[i] * x[i]",
    )
}

pub fn sasum() -> String {
    reduce(
        "@group(0) @binding(0) var<storage, read> x: array<f32>;
@group(0) @binding(1) var<storage, read_write> partial: array<f32>;",
        "abs(x[i])",
    )
}

/// Single workgroup; ties resolve to the lowest index.
pub const ISAMAX: &str = r#"
struct Params {
    n: u32,
}

var<push_constant> params: Params;

@group(0) @binding(0) var<storage, read> x: array<f32>;
@group(0) @binding(1) var<storage, read_write> result: array<u32>;

var<workgroup> best: array<f32, 64>;
var<workgroup> best_index: array<u32, 64>;

@compute @workgroup_size(64, 1, 1)
fn main(@builtin(local_invocation_id) lid: vec3<u32>) {
    let t = lid.x;
    var value = -1.0;
    var index = 0u;
    for (var i = t; i < params.n; i = i + 64u) {
        let a = abs(x[i]);
        if a > value {
            value = a;
            index = i;
        }
    }
    best[t] = value;
    best_index[t] = index;
    workgroupBarrier();

    for (var stride = 32u; stride > 0u; stride = stride / 2u) {
        if t < stride {
            let o = t + stride;
            if best[o] > best[t] || (best[o] == best[t] && best_index[o] < best_index[t]) {
                best[t] = best[o];
                best_index[t] = best_index[o];
            }
        }
        workgroupBarrier();
    }

    if t == 0u {
        result[0] = best_index[0];
    }
}
"#;

/// `y = alpha * A x + beta * y` with `A` row-major `m x n`.
pub const SGEMV: &str = r#"
struct Params {
    alpha: f32,
    beta: f32,
    m: u32,
    n: u32,
}

var<push_constant> params: Params;

@group(0) @binding(0) var<storage, read> a: array<f32>;
@group(0) @binding(1) var<storage, read> x: array<f32>;
@group(0) @binding(2) var<storage, read_write> y: array<f32>;

@compute @workgroup_size(64, 1, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let row = id.x;
    if row >= params.m {
        return;
    }
    var sum = 0.0;
    for (var j = 0u; j < params.n; j = j + 1u) {
        sum = sum + a[row * params.n + j] * x[j];
    }
    y[row] = params.alpha * sum + params.beta * y[row];
}
"#;

/// `C = alpha * A B + beta * C` with row-major `A: m x k`, `B: k x n`, `C: m x n`.
pub const SGEMM: &str = r#"
struct Params {
    alpha: f32,
    beta: f32,
    m: u32,
    k: u32,
    n: u32,
}

var<push_constant> params: Params;

@group(0) @binding(0) var<storage, read> a: array<f32>;
@group(0) @binding(1) var<storage, read> b: array<f32>;
@group(0) @binding(2) var<storage, read_write> c: array<f32>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let col = id.x;
    let row = id.y;
    if row >= params.m || col >= params.n {
        return;
    }
    var sum = 0.0;
    for (var p = 0u; p < params.k; p = p + 1u) {
        sum = sum + a[row * params.k + p] * b[p * params.n + col];
    }
    let index = row * params.n + col;
    c[index] = params.alpha * sum + params.beta * c[index];
}
"#;
