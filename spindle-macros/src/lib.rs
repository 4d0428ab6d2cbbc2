use proc_macro::{Delimiter, Group, TokenStream, TokenTree};

/// Runs the annotated function as the first fiber of a new scheduler.
///
/// The function may take the scheduler as its single parameter; its
/// type is ignored and replaced by `&spindle::Scheduler`.
///
/// ```rust,ignore
/// #[spindle::main(stack_size = 262144)]
/// fn main(s: &spindle::Scheduler) {
///     s.sleep_ms(10);
/// }
/// ```
#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attr_str = attr.to_string();
    let mut stack_size: Option<usize> = None;

    if !attr_str.is_empty() {
        for part in attr_str.split(',') {
            let part = part.trim();
            if let Some(v) = part.strip_prefix("stack_size") {
                let v = v.trim_start_matches(|c: char| c == '=' || c.is_whitespace());
                stack_size = v.replace('_', "").parse::<usize>().ok();
            }
        }
    }

    let mut builder = String::from("::spindle::SchedulerBuilder::new()");

    if let Some(n) = stack_size {
        builder.push_str(&format!(".stack_size({n})"));
    }

    rewrite(item, &builder, false)
}

/// Runs the annotated function as a test on a fresh scheduler.
///
/// The scheduler runs until every fiber spawned by the test finished, so
/// a panic in any of them fails the test.
#[proc_macro_attribute]
pub fn test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    rewrite(item, "::spindle::SchedulerBuilder::new()", true)
}

/// Turns `fn name(s: T) { body }` into a function that builds a
/// scheduler, spawns `body` as a fiber receiving `s`, and runs it.
fn rewrite(item: TokenStream, builder: &str, is_test: bool) -> TokenStream {
    let mut tokens: Vec<TokenTree> = item.into_iter().collect();

    let Some(fn_pos) = tokens
        .iter()
        .position(|t| matches!(t, TokenTree::Ident(id) if id.to_string() == "fn"))
    else {
        return error("expected a function");
    };

    let Some(params_pos) = tokens[fn_pos..]
        .iter()
        .position(|t| matches!(t, TokenTree::Group(g) if g.delimiter() == Delimiter::Parenthesis))
        .map(|offset| fn_pos + offset)
    else {
        return error("expected a parameter list");
    };

    let Some(body_pos) = tokens
        .iter()
        .rposition(|t| matches!(t, TokenTree::Group(g) if g.delimiter() == Delimiter::Brace))
    else {
        return error("expected a function body");
    };

    let param = match &tokens[params_pos] {
        TokenTree::Group(g) => scheduler_param(g.stream()),
        _ => unreachable!(),
    };

    let block = match &tokens[body_pos] {
        TokenTree::Group(g) => g.stream().to_string(),
        _ => unreachable!(),
    };

    let new_block = format!(
        "{{
            let scheduler = match {builder}.build() {{
                ::core::result::Result::Ok(scheduler) => scheduler,
                ::core::result::Result::Err(e) => panic!(\"failed to build scheduler: {{}}\", e),
            }};
            scheduler.spawn(move |{param}: &::spindle::Scheduler| {{ {block} }});
            scheduler.run();
        }}"
    );

    let Ok(new_block) = new_block.parse::<TokenStream>() else {
        return error("could not expand function body");
    };

    tokens[params_pos] = TokenTree::Group(Group::new(Delimiter::Parenthesis, TokenStream::new()));
    tokens[body_pos] = TokenTree::Group(Group::new(Delimiter::Brace, new_block));

    let mut result: Vec<TokenTree> = Vec::new();

    if is_test {
        if let Ok(test_attr) = "#[test]".parse::<TokenStream>() {
            result.extend(test_attr);
        }
    }

    result.extend(tokens);
    result.into_iter().collect()
}

/// Name bound to the scheduler inside the fiber, `_` if none was given.
fn scheduler_param(params: TokenStream) -> String {
    params
        .into_iter()
        .find_map(|t| match t {
            TokenTree::Ident(id) if id.to_string() != "mut" => Some(id.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| "_".to_owned())
}

fn error(msg: &str) -> TokenStream {
    format!("compile_error!({msg:?});")
        .parse()
        .unwrap_or_default()
}
