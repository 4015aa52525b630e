#[unsafe(no_mangle)]
/// ### English
/// Returns the C ABI version.
///
/// ### 中文
/// 返回 C ABI 版本号。
pub extern "C" fn xian_render_core_abi_version() -> u32 {
    super::XIAN_RENDER_ABI_VERSION
}

#[unsafe(no_mangle)]
/// ### English
/// Installs the `env_logger` backend (filtered by `RUST_LOG`). Returns `false` if a logger was
/// already installed.
///
/// ### 中文
/// 安装 `env_logger` 日志后端（由 `RUST_LOG` 过滤）。若已安装过日志器则返回 `false`。
pub extern "C" fn xian_render_core_init_logging() -> bool {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .try_init()
        .is_ok()
}
