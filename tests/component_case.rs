use contentplate::{process, ProcessOptions, TemplateEngine};
use serde_json::{json, Value};

const INVOICE: &str = r#"<h1>{{capitalize customer.name}}</h1>
<p>Issued {{formatDate issued "DD/MM/YYYY"}}</p>
{{#if lines}}<ul>
{{#each lines}}  <li>{{@index}}. {{title}} x{{qty}} = {{formatCurrency total currency}}{{#if note}} ({{note}}){{/if}}</li>
{{/each}}</ul>{{else}}<p>No lines</p>{{/if}}
{{#unless paid}}<strong>Due</strong>{{/unless}}"#;

fn invoice_data() -> Value {
    json!({
        "customer": { "name": "ada lovelace" },
        "issued": "2024-02-29T10:00:00Z",
        "currency": "EUR",
        "paid": false,
        "lines": [
            { "title": "Engine", "qty": 1, "total": 1250.5, "note": "rush" },
            { "title": "Cards", "qty": 40, "total": 12 }
        ]
    })
}

#[test]
fn renders_invoice_component() {
    let result = process(INVOICE, &invoice_data(), &ProcessOptions::default());

    let expected = "<h1>Ada lovelace</h1>
<p>Issued 29/02/2024</p>
<ul>
  <li>0. Engine x1 = €1,250.50 (rush)</li>
  <li>1. Cards x40 = €12.00</li>
</ul>
<strong>Due</strong>";
    assert_eq!(result.output, expected);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert!(result.missing_variables.is_empty(), "{:?}", result.missing_variables);
    assert!(result.used_variables.contains("customer.name"));
    assert!(result.used_variables.contains("lines"));
}

#[test]
fn renders_empty_invoice_branch() {
    let mut data = invoice_data();
    data["lines"] = json!([]);
    data["paid"] = json!(true);

    let result = process(INVOICE, &data, &ProcessOptions::default().trim(true));
    assert!(result.output.ends_with("<p>No lines</p>"));
}

#[test]
fn host_helpers_and_escaping_together() {
    let mut engine = TemplateEngine::new();
    engine.register_helper("initials", |args: &[Value]| {
        let name = args.first().and_then(Value::as_str).unwrap_or_default();
        Ok(Value::String(
            name.split_whitespace()
                .filter_map(|w| w.chars().next())
                .collect(),
        ))
    });

    let options = ProcessOptions::default().escape_html(true);
    let data = json!({ "user": { "name": "Grace Hopper", "bio": "<script>" } });
    let result = engine.process("{{initials user.name}}: {{user.bio}}", &data, &options);
    assert_eq!(result.output, "GH: &lt;script&gt;");
}
