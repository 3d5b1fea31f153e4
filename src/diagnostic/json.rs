use super::{Diagnostic, Severity};

pub fn render(d: &Diagnostic) -> String {
    let severity = match d.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
    };

    let listing: Vec<serde_json::Value> = d
        .listing
        .iter()
        .map(|l| serde_json::json!({ "pc": l.pc, "instruction": l.text, "primary": l.is_primary }))
        .collect();

    let mut obj = serde_json::json!({
        "severity": severity,
        "message": d.message,
        "listing": listing,
        "notes": d.notes,
    });

    if let Some(loc) = &d.location {
        obj["location"] = serde_json::json!({ "function": loc.function, "pc": loc.pc });
    }

    if let Some(s) = &d.suggestion {
        obj["suggestion"] = serde_json::Value::String(s.clone());
    }

    serde_json::to_string(&obj)
        .unwrap_or_else(|_| r#"{"severity":"error","message":"internal error serializing diagnostic"}"#.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{ins, ins_a_bc, Opcode};

    fn parse_json(s: &str) -> serde_json::Value {
        serde_json::from_str(s).expect("valid JSON")
    }

    #[test]
    fn render_basic_error() {
        let v = parse_json(&render(&Diagnostic::error("Stack overflow")));
        assert_eq!(v["severity"], "error");
        assert_eq!(v["message"], "Stack overflow");
        assert!(v["listing"].as_array().unwrap().is_empty());
        assert!(v.get("location").is_none());
        assert!(v.get("suggestion").is_none());
    }

    #[test]
    fn render_with_location_and_listing() {
        let code = vec![ins_a_bc(Opcode::LOAD_rA_iBC, 0, 1), ins(Opcode::RETURN)];
        let d = Diagnostic::error("bad").at("helper", 1).with_listing(&code);
        let v = parse_json(&render(&d));
        assert_eq!(v["location"]["function"], "helper");
        assert_eq!(v["location"]["pc"], 1);
        let listing = v["listing"].as_array().unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0]["instruction"], "LOAD_rA_iBC r0, 1");
        assert_eq!(listing[0]["primary"], false);
        assert_eq!(listing[1]["instruction"], "RETURN");
        assert_eq!(listing[1]["primary"], true);
    }

    #[test]
    fn render_with_notes_and_suggestion() {
        let d = Diagnostic::error("bad").with_note("call depth 3").with_suggestion("try this instead");
        let v = parse_json(&render(&d));
        assert_eq!(v["notes"][0], "call depth 3");
        assert_eq!(v["suggestion"], "try this instead");
    }

    #[test]
    fn render_warning_severity() {
        let v = parse_json(&render(&Diagnostic::warning("CALL on a non-function")));
        assert_eq!(v["severity"], "warning");
    }
}
