use serde::Serialize;

pub const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

/// Serialize `value` as an indented XML document with a declaration.
pub fn to_document<T: Serialize>(value: &T) -> Result<String, String> {
    let mut body = String::new();
    let mut serializer = quick_xml::se::Serializer::new(&mut body);
    serializer.indent(' ', 2);
    value.serialize(serializer).map_err(|e| e.to_string())?;
    Ok(format!("{XML_HEADER}{body}\n"))
}
