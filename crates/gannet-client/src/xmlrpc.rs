//! A minimal XML-RPC codec, just big enough for the changelog methods the
//! simple-xmlrpc backend consumes.

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Value {
    Int(i64),
    Str(String),
    Bool(bool),
    Array(Vec<Value>),
    Struct(Vec<(String, Value)>),
    Nil,
}

impl Value {
    pub(crate) fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(int) => Some(*int),
            _ => None,
        }
    }

    pub(crate) fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(string) => Some(string),
            _ => None,
        }
    }
}

/// Render a `<methodCall>` document.
pub(crate) fn render_call(method: &str, params: &[Value]) -> String {
    let mut body = String::from("<?xml version=\"1.0\"?><methodCall><methodName>");
    body.push_str(&escape(method));
    body.push_str("</methodName><params>");
    for param in params {
        body.push_str("<param><value>");
        render_value(&mut body, param);
        body.push_str("</value></param>");
    }
    body.push_str("</params></methodCall>");
    body
}

fn render_value(body: &mut String, value: &Value) {
    match value {
        Value::Int(int) => {
            body.push_str("<int>");
            body.push_str(&int.to_string());
            body.push_str("</int>");
        }
        Value::Str(string) => {
            body.push_str("<string>");
            body.push_str(&escape(string.as_str()));
            body.push_str("</string>");
        }
        Value::Bool(boolean) => {
            body.push_str("<boolean>");
            body.push_str(if *boolean { "1" } else { "0" });
            body.push_str("</boolean>");
        }
        Value::Array(items) => {
            body.push_str("<array><data>");
            for item in items {
                body.push_str("<value>");
                render_value(body, item);
                body.push_str("</value>");
            }
            body.push_str("</data></array>");
        }
        Value::Struct(members) => {
            body.push_str("<struct>");
            for (name, member) in members {
                body.push_str("<member><name>");
                body.push_str(&escape(name.as_str()));
                body.push_str("</name><value>");
                render_value(body, member);
                body.push_str("</value></member>");
            }
            body.push_str("</struct>");
        }
        Value::Nil => body.push_str("<nil/>"),
    }
}

/// Parse a `<methodResponse>` document into its single parameter value, or
/// surface the fault it carries.
pub(crate) fn parse_response(xml: &str) -> Result<Value, Error> {
    let mut reader = Reader::from_str(xml);
    let mut in_fault = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) => match tag.name().as_ref() {
                b"fault" => in_fault = true,
                b"value" => {
                    let value = parse_value(&mut reader)?;
                    if in_fault {
                        return Err(fault_from_value(&value));
                    }
                    return Ok(value);
                }
                // methodResponse, params, param
                _ => {}
            },
            Ok(Event::Eof) => {
                return Err(Error::BadXml("response carries no value".to_string()))
            }
            Err(err) => return Err(Error::BadXml(err.to_string())),
            Ok(_) => {}
        }
    }
}

/// Parse the contents of a `<value>` whose start tag was just consumed.
fn parse_value(reader: &mut Reader<&[u8]>) -> Result<Value, Error> {
    let mut value = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) => match tag.name().as_ref() {
                b"int" | b"i4" | b"i8" => {
                    let text = read_text(reader, b"int tag")?;
                    let int = text
                        .trim()
                        .parse()
                        .map_err(|_| Error::BadXml(format!("not an integer: {text:?}")))?;
                    value = Some(Value::Int(int));
                }
                b"boolean" => {
                    let text = read_text(reader, b"boolean tag")?;
                    value = Some(Value::Bool(text.trim() == "1"));
                }
                b"string" | b"double" | b"dateTime.iso8601" | b"base64" => {
                    value = Some(Value::Str(read_text(reader, b"scalar tag")?));
                }
                b"array" => value = Some(parse_array(reader)?),
                b"struct" => value = Some(parse_struct(reader)?),
                other => {
                    return Err(Error::BadXml(format!(
                        "unexpected element: {}",
                        String::from_utf8_lossy(other)
                    )))
                }
            },
            Ok(Event::Empty(tag)) if tag.name().as_ref() == b"nil" => value = Some(Value::Nil),
            // Untyped content inside <value> is a string.
            Ok(Event::Text(text)) => {
                if value.is_none() {
                    let text = text
                        .unescape()
                        .map_err(|err| Error::BadXml(err.to_string()))?;
                    if !text.trim().is_empty() {
                        value = Some(Value::Str(text.into_owned()));
                    }
                }
            }
            Ok(Event::End(tag)) if tag.name().as_ref() == b"value" => {
                return Ok(value.unwrap_or_else(|| Value::Str(String::new())))
            }
            Ok(Event::Eof) => return Err(Error::BadXml("unterminated value".to_string())),
            Err(err) => return Err(Error::BadXml(err.to_string())),
            Ok(_) => {}
        }
    }
}

fn parse_array(reader: &mut Reader<&[u8]>) -> Result<Value, Error> {
    let mut items = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) => match tag.name().as_ref() {
                b"value" => items.push(parse_value(reader)?),
                b"data" => {}
                other => {
                    return Err(Error::BadXml(format!(
                        "unexpected element in array: {}",
                        String::from_utf8_lossy(other)
                    )))
                }
            },
            Ok(Event::End(tag)) if tag.name().as_ref() == b"array" => {
                return Ok(Value::Array(items))
            }
            Ok(Event::Eof) => return Err(Error::BadXml("unterminated array".to_string())),
            Err(err) => return Err(Error::BadXml(err.to_string())),
            Ok(_) => {}
        }
    }
}

fn parse_struct(reader: &mut Reader<&[u8]>) -> Result<Value, Error> {
    let mut members = Vec::new();
    let mut name = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) => match tag.name().as_ref() {
                b"member" => name = None,
                b"name" => name = Some(read_text(reader, b"member name")?),
                b"value" => {
                    let value = parse_value(reader)?;
                    members.push((name.take().unwrap_or_default(), value));
                }
                other => {
                    return Err(Error::BadXml(format!(
                        "unexpected element in struct: {}",
                        String::from_utf8_lossy(other)
                    )))
                }
            },
            Ok(Event::End(tag)) if tag.name().as_ref() == b"struct" => {
                return Ok(Value::Struct(members))
            }
            Ok(Event::Eof) => return Err(Error::BadXml("unterminated struct".to_string())),
            Err(err) => return Err(Error::BadXml(err.to_string())),
            Ok(_) => {}
        }
    }
}

fn read_text(reader: &mut Reader<&[u8]>, context: &'static [u8]) -> Result<String, Error> {
    let mut text = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Text(chunk)) => {
                text.push_str(
                    &chunk
                        .unescape()
                        .map_err(|err| Error::BadXml(err.to_string()))?,
                );
            }
            Ok(Event::End(_)) => return Ok(text),
            Ok(Event::Eof) => {
                return Err(Error::BadXml(format!(
                    "unterminated {}",
                    String::from_utf8_lossy(context)
                )))
            }
            Err(err) => return Err(Error::BadXml(err.to_string())),
            Ok(_) => {}
        }
    }
}

fn fault_from_value(value: &Value) -> Error {
    let Value::Struct(members) = value else {
        return Error::BadXml("fault without struct".to_string());
    };
    let mut code = 0;
    let mut message = String::new();
    for (name, member) in members {
        match name.as_str() {
            "faultCode" => code = member.as_int().unwrap_or_default(),
            "faultString" => message = member.as_str().unwrap_or_default().to_string(),
            _ => {}
        }
    }
    Error::Fault { code, message }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn render_changelog_call() {
        assert_eq!(
            render_call("changelog_since_serial", &[Value::Int(100)]),
            "<?xml version=\"1.0\"?><methodCall>\
             <methodName>changelog_since_serial</methodName>\
             <params><param><value><int>100</int></value></param></params>\
             </methodCall>"
        );
    }

    #[test]
    fn parse_changelog_response() {
        let xml = indoc! {r#"
            <?xml version="1.0"?>
            <methodResponse><params><param><value><array><data>
              <value><array><data>
                <value><string>six</string></value>
                <value><string>1.15.0</string></value>
                <value><int>1590000000</int></value>
                <value><string>new release</string></value>
                <value><int>101</int></value>
              </data></array></value>
            </data></array></value></param></params></methodResponse>
        "#};
        let value = parse_response(xml).unwrap();
        let Value::Array(events) = value else {
            panic!("expected an array, got {value:?}");
        };
        let Value::Array(event) = &events[0] else {
            panic!("expected an event array");
        };
        assert_eq!(event[0].as_str(), Some("six"));
        assert_eq!(event[4].as_int(), Some(101));
    }

    #[test]
    fn parse_untyped_string_value() {
        let xml = "<methodResponse><params><param>\
                   <value>plain</value></param></params></methodResponse>";
        assert_eq!(parse_response(xml).unwrap().as_str(), Some("plain"));
    }

    #[test]
    fn faults_surface_as_errors() {
        let xml = indoc! {r#"
            <methodResponse><fault><value><struct>
              <member><name>faultCode</name><value><int>1</int></value></member>
              <member><name>faultString</name><value><string>boom</string></value></member>
            </struct></value></fault></methodResponse>
        "#};
        let err = parse_response(xml).unwrap_err();
        assert!(matches!(err, Error::Fault { code: 1, .. }), "{err:?}");
    }
}
