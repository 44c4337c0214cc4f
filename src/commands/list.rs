use roadie::tasks::{TaskArg, REGISTRY};

fn usage(name: &str, arg: TaskArg) -> String {
    match arg {
        TaskArg::None => name.to_string(),
        TaskArg::Optional(what) => format!("{}[:<{}>]", name, what),
        TaskArg::Required(what) => format!("{}:<{}>", name, what),
    }
}

/// The task registry as a plain text table.
pub fn render() -> String {
    let rows: Vec<(String, &str)> = REGISTRY
        .iter()
        .map(|t| (usage(t.name, t.arg), t.about))
        .collect();
    let width = rows.iter().map(|(u, _)| u.len()).max().unwrap_or(0);

    let mut out = String::from("Available tasks:\n\n");
    for (usage, about) in rows {
        out.push_str(&format!("  {:<width$}  {}\n", usage, about, width = width));
    }
    out
}
