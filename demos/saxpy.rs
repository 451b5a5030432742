use std::error::Error;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use vklaunch::{ComputeApp, ContextConfig, KernelSource, Launch, LaunchConfig, PushConstants};

const SHADER: &str = r#"
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

#[derive(Debug, Clone, Copy, PushConstants)]
struct Saxpy {
    a: f32,
}

/// Uses the SPIR-V file given as the first argument, or compiles the built-in shader.
fn kernel() -> Result<KernelSource, Box<dyn Error>> {
    if let Some(path) = std::env::args().nth(1) {
        return Ok(KernelSource::Path(path.into()));
    }
    let module = naga::front::wgsl::parse_str(SHADER)?;
    let info = Validator::new(ValidationFlags::all(), Capabilities::PUSH_CONSTANT)
        .validate(&module)?;
    let pipeline = naga::back::spv::PipelineOptions {
        shader_stage: naga::ShaderStage::Compute,
        entry_point: "main".into(),
    };
    let words = naga::back::spv::write_vec(
        &module,
        &info,
        &naga::back::spv::Options::default(),
        Some(&pipeline),
    )?;
    Ok(words.into())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::TRACE)
        .init();

    const N: usize = 16;
    let x: Vec<f32> = (0..N).map(|x| x as f32).collect();
    let y = vec![1.0f32; N];

    let launch = Launch::new(kernel()?)
        .named("x", &x)
        .named("y", &y)
        .push_constants(Saxpy { a: 2.0 })
        .dims([N as u32, 1, 1])
        .workgroup([64, 1, 1]);
    let validation = std::env::var_os("VKLAUNCH_VALIDATION").is_some();
    let config = LaunchConfig::default().context(ContextConfig::default().validation(validation));
    let app = ComputeApp::new(launch, &config)?;

    println!("device: {}", app.context().name());
    println!("grid: {}", app.grid().map(|grid| grid.to_string()).unwrap_or_default());
    println!("x: {}", app.format_buffer("x")?);
    println!("y: {}", app.format_buffer("y")?);
    Ok(())
}
