// build.rs
// Compiles the GLSL shader sources in shaders/ to SPIR-V next to them.
// The renderer loads the .spv files by fixed name at runtime, so a build
// without the Vulkan SDK still compiles and unit-tests; it just cannot
// render until the shaders are compiled.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_EXTENSIONS: &[&str] = &["vert", "frag", "rgen", "rmiss", "rchit"];

fn main() {
    println!("cargo:rerun-if-changed=../../shaders");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let vulkan_sdk = match env::var("VULKAN_SDK") {
        Ok(sdk) => sdk,
        Err(_) => {
            eprintln!("warning: VULKAN_SDK not set, shader compilation skipped");
            return;
        }
    };

    let glslc = if cfg!(target_os = "windows") {
        format!("{}\\Bin\\glslc.exe", vulkan_sdk)
    } else {
        format!("{}/bin/glslc", vulkan_sdk)
    };

    if !Path::new(&glslc).exists() {
        eprintln!("warning: glslc not found at {}, shader compilation skipped", glslc);
        return;
    }

    let shader_dir = PathBuf::from("../../shaders");
    let entries = match std::fs::read_dir(&shader_dir) {
        Ok(entries) => entries,
        Err(_) => {
            eprintln!("info: No shader directory found at {:?}", shader_dir);
            return;
        }
    };

    let mut compiled = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !SHADER_EXTENSIONS.contains(&ext) {
            continue;
        }

        let output = path.with_extension(format!("{}.spv", ext));
        let status = Command::new(&glslc)
            .arg("--target-env=vulkan1.2")
            .arg(&path)
            .arg("-o")
            .arg(&output)
            .status();

        match status {
            Ok(status) if status.success() => compiled += 1,
            Ok(status) => panic!("glslc failed on {:?} with {}", path, status),
            Err(e) => panic!("failed to run glslc: {}", e),
        }
    }

    eprintln!("info: Compiled {} shaders", compiled);
}
