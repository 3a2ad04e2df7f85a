use std::path::PathBuf;
use std::{env, fs};

fn main() {
    let shaders = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap()).join("../../shaders");
    println!("cargo:rerun-if-changed={}", shaders.display());

    #[cfg(feature = "shaderc")]
    compile(&shaders);
}

#[cfg(feature = "shaderc")]
fn compile(dir: &std::path::Path) {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (name, kind) in [
        ("scene.vert", shaderc::ShaderKind::Vertex),
        ("scene.frag", shaderc::ShaderKind::Fragment),
    ] {
        let path = dir.join(name);
        let src = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("read {}: {e}", path.display()));
        let spv = comp
            .compile_into_spirv(&src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("compile {name}: {e}"));
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8()).unwrap();
    }
}
