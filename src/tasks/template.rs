// src/tasks/template.rs

/// Platform command that deletes a directory tree, for `%{rm}`.
pub const RM_COMMAND: &str = if cfg!(windows) {
    "rmdir /S /Q"
} else {
    "rm -rf"
};

/// Values substituted into command templates.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub rm: &'a str,
    pub npm_command: &'a str,
    pub service: &'a str,
}

/// Replace every `%{rm}`, `%{npmCommand}` and `%{service}`. Unknown
/// placeholders are left as they are.
pub fn render(template: &str, ctx: &TemplateContext<'_>) -> String {
    template
        .replace("%{rm}", ctx.rm)
        .replace("%{npmCommand}", ctx.npm_command)
        .replace("%{service}", ctx.service)
}
