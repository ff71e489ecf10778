//! The seven-entry replacement catalogue (§4.G) plus placeholder resolution.
//!
//! Catalogue entries each pair a `probe` (cheap existence check) with one or
//! more `{search, replace}` pairs; `replace` bodies contain `%name%`
//! placeholders resolved once per compile by [`Placeholders::resolve`] before
//! the catalogue is built, so [`super::inject`] never touches placeholder text
//! itself.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Replacement, SearchReplace};
use crate::config::CompilationMode;

/// Resolved `%name%` -> concrete-identifier map for one compile. In
/// `debug`/`standard` mode the names are literal (substitution is a no-op);
/// in `optimize` mode they are recovered from the emitted, minified code by a
/// handful of anchor regexes, falling back to the literal name (keeping
/// substitution total) when an anchor doesn't find a confident match.
#[derive(Debug, Clone)]
pub struct Placeholders {
    pub init: String,
    pub update: String,
    pub subscriptions: String,
    pub view: String,
    pub setup: String,
    pub on_url_change: String,
    pub on_url_request: String,
    pub body: String,
    pub title: String,
    pub protocol: String,
    pub host: String,
    pub port_: String,
    /// Extra `var X = impl.Y;` pairs discovered in the emitted code, each
    /// exposed as its own `%X%` placeholder.
    pub extra: Vec<(String, String)>,
}

impl Placeholders {
    fn identity() -> Self {
        Self {
            init: "init".to_string(),
            update: "update".to_string(),
            subscriptions: "subscriptions".to_string(),
            view: "view".to_string(),
            setup: "setup".to_string(),
            on_url_change: "onUrlChange".to_string(),
            on_url_request: "onUrlRequest".to_string(),
            body: "body".to_string(),
            title: "title".to_string(),
            protocol: "protocol".to_string(),
            host: "host".to_string(),
            port_: "port_".to_string(),
            extra: Vec::new(),
        }
    }

    pub fn resolve(mode: CompilationMode, code: &str) -> Self {
        match mode {
            CompilationMode::Debug | CompilationMode::Standard => Self::identity(),
            CompilationMode::Optimize => Self::from_anchors(code),
        }
    }

    /// Five anchors recovering the minified names an optimize-mode build gave
    /// to the impl record's fields. Each anchor falls back to the literal
    /// name when it can't find a confident match, so substitution stays
    /// total (§8: "no %name% remains" after substitution).
    fn from_anchors(code: &str) -> Self {
        static IMPL_RECORD: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"impl:\s*\{\s*init:\s*([$\w]+),\s*update:\s*([$\w]+),\s*subscriptions:\s*([$\w]+),\s*view:\s*([$\w]+)").unwrap()
        });
        static SETUP_ANCHOR: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"setup:\s*([$\w]+)").unwrap());
        static URL_ANCHORS: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"onUrlChange:\s*([$\w]+),\s*onUrlRequest:\s*([$\w]+)").unwrap()
        });
        static BODY_TITLE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"body:\s*([$\w]+),\s*title:\s*([$\w]+)").unwrap());
        static LOCATION_ANCHOR: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"protocol:\s*([$\w]+),\s*host:\s*([$\w]+),\s*port_?:\s*([$\w]+)").unwrap()
        });

        let mut placeholders = Self::identity();

        if let Some(caps) = IMPL_RECORD.captures(code) {
            placeholders.init = caps[1].to_string();
            placeholders.update = caps[2].to_string();
            placeholders.subscriptions = caps[3].to_string();
            placeholders.view = caps[4].to_string();
        }
        if let Some(caps) = SETUP_ANCHOR.captures(code) {
            placeholders.setup = caps[1].to_string();
        }
        if let Some(caps) = URL_ANCHORS.captures(code) {
            placeholders.on_url_change = caps[1].to_string();
            placeholders.on_url_request = caps[2].to_string();
        }
        if let Some(caps) = BODY_TITLE.captures(code) {
            placeholders.body = caps[1].to_string();
            placeholders.title = caps[2].to_string();
        }
        if let Some(caps) = LOCATION_ANCHOR.captures(code) {
            placeholders.protocol = caps[1].to_string();
            placeholders.host = caps[2].to_string();
            placeholders.port_ = caps[3].to_string();
        }

        static VAR_IMPL: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"var ([$\w]+) = impl\.([$\w]+);").unwrap());
        placeholders.extra =
            VAR_IMPL.captures_iter(code).map(|c| (c[2].to_string(), c[1].to_string())).collect();

        placeholders
    }

    fn substitute(&self, template: &str) -> String {
        let mut out = template
            .replace("%init%", &self.init)
            .replace("%update%", &self.update)
            .replace("%subscriptions%", &self.subscriptions)
            .replace("%view%", &self.view)
            .replace("%setup%", &self.setup)
            .replace("%onUrlChange%", &self.on_url_change)
            .replace("%onUrlRequest%", &self.on_url_request)
            .replace("%body%", &self.body)
            .replace("%title%", &self.title)
            .replace("%protocol%", &self.protocol)
            .replace("%host%", &self.host)
            .replace("%port_%", &self.port_);
        for (name, value) in &self.extra {
            out = out.replace(&format!("%{name}%"), value);
        }
        out
    }
}

/// The near-top-of-file fallback block (§4.G / §9's "global effect-manager
/// map" note) so the rewritten `_Platform_initialize` body still compiles in
/// programs with no effect managers of their own.
pub const EFFECT_MANAGER_FALLBACK: &str =
    "var _Platform_effectManagers = _Platform_effectManagers || {}, _Scheduler_enqueue = _Scheduler_enqueue || function(){};\n";

fn dotall(pattern: &str) -> Regex {
    Regex::new(&format!("(?s){pattern}")).expect("catalogue regex must compile")
}

fn line_anchored(name: &str) -> Regex {
    Regex::new(&format!(r"(?m)^function {name}\(")).expect("probe regex must compile")
}

fn function_body_search(name: &str) -> Regex {
    dotall(&format!(r"function {name}\(.*?\n\}}\n"))
}

/// Builds the full catalogue for one compile, with every `%name%`
/// placeholder already substituted with `placeholders`'s resolved names.
pub fn catalogue(placeholders: &Placeholders) -> Vec<Replacement> {
    vec![
        platform_initialize(placeholders),
        virtual_dom_init(placeholders),
        platform_export(placeholders),
        browser_application(placeholders),
        browser_sandbox(placeholders),
        single_call_site_programs(placeholders),
        scheduler_binding(placeholders),
    ]
}

fn platform_initialize(p: &Placeholders) -> Replacement {
    let replace = p.substitute(
        "function _Platform_initialize(flagDecoder, args, %init%, %update%, %subscriptions%, stepperBuilder, sentinel)\n\
         {\n\
         \tvar introspection = { flagDecoder: flagDecoder, %init%: %init%, %update%: %update%, %subscriptions%: %subscriptions% };\n\
         \tvar result = A2(_Json_run, flagDecoder, args ? args['flags'] : undefined);\n\
         \t$elm$core$Result$isOk(result) || _Debugger_crash(2, result.a);\n\
         \tvar managers = {};\n\
         \tvar initialModel = %init%(result.a);\n\
         \tvar model = initialModel.a;\n\
         \tvar stepper = stepperBuilder(_Platform_sendToApp(managers), model);\n\
         \tstepper(model);\n\
         \tvar api = { model: model, __elmWatchHotReload: function (newData) {\n\
         \t\treturn _ElmWatch_applyHotReload(introspection, newData, model, managers, stepper, sentinel);\n\
         \t} };\n\
         \treturn api;\n\
         }\n",
    );
    Replacement {
        name: "_Platform_initialize",
        probe: line_anchored("_Platform_initialize"),
        pairs: vec![SearchReplace { search: function_body_search("_Platform_initialize"), replace }],
    }
}

fn virtual_dom_init(p: &Placeholders) -> Replacement {
    let replace = p.substitute(
        "function _VirtualDom_init(virtualNode, flagDecoder, %update%, %view%, sentinel)\n\
         {\n\
         \tvar model = { virtualNode: virtualNode };\n\
         \tvar api = { __elmWatchHotReload: function (newData) {\n\
         \t\treturn _ElmWatch_applyVirtualDomHotReload(model, newData, %update%, %view%, sentinel);\n\
         \t} };\n\
         \treturn api;\n\
         }\n",
    );
    Replacement {
        name: "_VirtualDom_init",
        probe: line_anchored("_VirtualDom_init"),
        pairs: vec![SearchReplace { search: function_body_search("_VirtualDom_init"), replace }],
    }
}

fn platform_export(_p: &Placeholders) -> Replacement {
    let replace = "function _Platform_export(exports)\n\
         {\n\
         \t_ElmWatch_registeredApps = _ElmWatch_registeredApps || {};\n\
         \tfunction registerHotReload(moduleName, app) {\n\
         \t\t(_ElmWatch_registeredApps[moduleName] = _ElmWatch_registeredApps[moduleName] || []).push(app);\n\
         \t}\n\
         \t_Platform_mergeExportsElmWatch('', exports, registerHotReload);\n\
         \treturn exports;\n\
         }\n"
        .to_string();
    Replacement {
        name: "_Platform_export",
        probe: line_anchored("_Platform_export"),
        pairs: vec![SearchReplace { search: function_body_search("_Platform_export"), replace }],
    }
}

fn browser_application(p: &Placeholders) -> Replacement {
    let replace = p.substitute(
        "function _Browser_application(impl)\n\
         {\n\
         \treturn {\n\
         \t\tinit: impl.%init%,\n\
         \t\tview: impl.%view%,\n\
         \t\tupdate: impl.%update%,\n\
         \t\tsubscriptions: impl.%subscriptions%,\n\
         \t\tonUrlChange: impl.%onUrlChange%,\n\
         \t\tonUrlRequest: impl.%onUrlRequest%,\n\
         \t\t_impl: impl\n\
         \t};\n\
         }\n",
    );
    Replacement {
        name: "_Browser_application",
        probe: line_anchored("_Browser_application"),
        pairs: vec![SearchReplace { search: function_body_search("_Browser_application"), replace }],
    }
}

fn browser_sandbox(p: &Placeholders) -> Replacement {
    let replace = p.substitute(
        "function $elm$browser$Browser$sandbox(impl)\n\
         {\n\
         \treturn {\n\
         \t\tinit: function (flags) { return _Utils_Tuple2(impl.%init%, $elm$core$Platform$Cmd$none); },\n\
         \t\tview: function (model) { return impl.%view%(model); },\n\
         \t\tupdate: F2(function (msg, model) { return _Utils_Tuple2(impl.%update%(msg, model), $elm$core$Platform$Cmd$none); }),\n\
         \t\tsubscriptions: function (_v0) { return $elm$core$Platform$Sub$none; },\n\
         \t\t_impl: impl\n\
         \t};\n\
         }\n",
    );
    Replacement {
        name: "$elm$browser$Browser$sandbox",
        probe: line_anchored(r"\$elm\$browser\$Browser\$sandbox"),
        pairs: vec![SearchReplace {
            search: function_body_search(r"\$elm\$browser\$Browser\$sandbox"),
            replace,
        }],
    }
}

/// `_Platform_worker`, `_Browser_element`/`_Browser_document`,
/// `_Debugger_element`/`_Debugger_document` each update their single
/// `_Platform_initialize(...)` call site the same way (§4.G item 6): pass
/// `programType`/`isDebug`/the full impl through, preferring `impl._impl`
/// when a wrapper (Component's `_Browser_application`/`sandbox` rewrite)
/// already produced one.
fn single_call_site_programs(_p: &Placeholders) -> Replacement {
    let search = dotall(
        r"return _Platform_initialize\(\s*impl\.flagDecoder,\s*args,\s*impl\.init,\s*impl\.update,\s*impl\.subscriptions,\s*stepperBuilder\s*\);",
    );
    let replace = "return _Platform_initialize(\n\
        \t\t(impl._impl || impl).flagDecoder,\n\
        \t\targs,\n\
        \t\t(impl._impl || impl).init,\n\
        \t\t(impl._impl || impl).update,\n\
        \t\t(impl._impl || impl).subscriptions,\n\
        \t\tstepperBuilder,\n\
        \t\t{ programType: programType, isDebug: isDebug, impl: impl }\n\
        \t);"
        .to_string();
    Replacement {
        name: "single_call_site_programs",
        probe: dotall(r"return _Platform_initialize\("),
        pairs: vec![SearchReplace { search, replace }],
    }
}

fn scheduler_binding(_p: &Placeholders) -> Replacement {
    let search = dotall(r"task\.c\s*=\s*null;");
    let replace = "task.c = function () {};".to_string();
    Replacement {
        name: "_Scheduler_binding",
        probe: line_anchored("_Scheduler_binding"),
        pairs: vec![SearchReplace { search, replace }],
    }
}

#[cfg(test)]
pub mod fixtures {
    pub const PLATFORM_INITIALIZE_DEBUG: &str = "function _Platform_initialize(flagDecoder, args, init, update, subscriptions, stepperBuilder)\n{\n\tvar result = init(args);\n}\n";
}
