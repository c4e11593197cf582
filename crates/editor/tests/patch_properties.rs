use bus::surface::SurfaceNode;
use editor::targeting;
use editor::{
    Address, AddressResolutionFailure, ChangedSubtree, PatchEngine, PatchError, ScopedTarget,
};
use html::dom_snapshot::{DomSnapshotOptions, assert_dom_eq};
use html::{ParseLimits, Sanitizer, parse_document, serialize_document};

const CORPUS: &[&str] = &[
    "<!DOCTYPE html><html><head><title>T &amp; t</title></head><body><p>x</p></body></html>",
    "<div class=\"card\"><h2>Title<p>unclosed<ul><li>one<li>two</ul></div>",
    "<table><tr><td>a<td>b</tr><tr><td>c</table><script>if (a < b) {}</script>",
    concat!(
        "<main>\n  <section id=\"hero\">\n",
        "    <img src=\"x.png\" alt=\"\">\n    <br>\n  </section>\n</main>",
    ),
    "text only &nbsp; &lt;tag&gt;",
    "<svg viewBox=\"0 0 1 1\"><path d=\"M0 0\"/></svg><textarea><b>raw</b></textarea>",
];

fn engine(markup: &str) -> PatchEngine {
    let mut engine = PatchEngine::new(Sanitizer::new(ParseLimits::default()));
    engine.replace_whole(markup).unwrap();
    engine
}

#[test]
fn replace_whole_of_own_serialization_is_idempotent() {
    for input in CORPUS {
        let mut engine = engine(input);
        let first = engine.live().unwrap().doc.clone();
        let markup = serialize_document(&first);
        engine.replace_whole(&markup).unwrap();
        let second = &engine.live().unwrap().doc;
        assert_dom_eq(&first, second, DomSnapshotOptions::default());

        // And once more through the sanitized text, which carries no ids.
        let sanitized = Sanitizer::sanitized_markup(second);
        let reparsed = parse_document(&sanitized, &ParseLimits::default()).unwrap();
        assert_dom_eq(&first, &reparsed, DomSnapshotOptions::default());
    }
}

#[test]
fn every_record_address_resolves_to_its_node() {
    for input in CORPUS {
        let engine = engine(input);
        let snapshot = engine.live().unwrap();
        let preserved = engine.pin().unwrap();
        for record in snapshot.mapping.iter() {
            let Some(address) = record.address() else {
                assert_eq!(record.id, 0, "only the root element lacks a parent");
                continue;
            };
            let parent = snapshot.mapping.get(address.parent_id).unwrap();
            assert_eq!(
                snapshot.doc.nth_element_child(parent.key, address.child_index),
                Some(record.key),
                "{input}: record {}",
                record.id
            );

            let node = SurfaceNode::new(u64::from(record.id), Some(&record.id.to_string()));
            assert_eq!(targeting::resolve(&node, &preserved, &snapshot.doc), Ok(address));
        }
    }
}

#[test]
fn addresses_outside_the_edit_stay_valid_after_a_scoped_edit() {
    let mut engine = engine("<div><p>a</p><p>b</p><p>c</p></div><footer><span>f</span></footer>");
    let preserved = engine.pin().unwrap();
    let second = preserved.mapping().iter().filter(|r| r.tag == "p").nth(1).unwrap().clone();
    let target = ScopedTarget {
        id: second.id,
        address: second.address().unwrap(),
        preserved: preserved.clone(),
    };
    engine.replace_scoped("<p>B</p>", &target).unwrap();

    let doc = &engine.live().unwrap().doc;
    for record in preserved.mapping().iter().filter(|r| r.id != second.id && doc.is_live(r.key)) {
        let node = SurfaceNode::new(0, Some(&record.id.to_string()));
        match record.address() {
            Some(address) => assert_eq!(targeting::resolve(&node, &preserved, doc), Ok(address)),
            None => assert_eq!(record.id, 0),
        }
    }
}

// The parent exists in the preserved mapping but has fewer
// element children than the address expects.
#[test]
fn stale_scoped_address_fails_without_mutation() {
    let mut engine = engine("<div><section><ul><li>only</li></ul></section></div>");
    let preserved = engine.pin().unwrap();
    assert_eq!(preserved.mapping().get(5).unwrap().tag, "ul");
    let before = engine.current_outcome().unwrap();

    let target = ScopedTarget {
        id: 6,
        address: Address {
            parent_id: 5,
            child_index: 2,
        },
        preserved,
    };
    let err = engine.replace_scoped("<li>new</li>", &target).unwrap_err();
    assert!(matches!(
        err,
        PatchError::AddressResolution(AddressResolutionFailure::IndexOutOfRange {
            parent_id: 5,
            child_index: 2,
            len: 1
        })
    ));

    let after = engine.current_outcome().unwrap();
    assert_eq!(after.version, before.version);
    assert_eq!(after.render_markup, before.render_markup);
}

#[test]
fn scoped_edit_then_finalize_matches_a_direct_parse() {
    let mut engine = engine("<div><p>a</p><p>b</p></div>");
    let preserved = engine.pin().unwrap();
    let target = ScopedTarget {
        id: 5,
        address: Address {
            parent_id: 3,
            child_index: 1,
        },
        preserved,
    };
    let outcome = engine.replace_scoped("<p>b</p><p>b2</p>", &target).unwrap();
    assert!(matches!(outcome.change, ChangedSubtree::Subtree { .. }));

    engine.finalize().unwrap();
    let expected =
        parse_document("<div><p>a</p><p>b</p><p>b2</p></div>", &ParseLimits::default()).unwrap();
    assert_dom_eq(&expected, &engine.live().unwrap().doc, DomSnapshotOptions::default());
}

// A marker `div` serialized inside a `p` would close the paragraph on
// reparse; finalize must promote the edit into the paragraph itself.
#[test]
fn inline_scoped_edit_stays_inside_its_paragraph() {
    let mut engine = engine("<p>Hello <b>world</b>!</p>");
    let preserved = engine.pin().unwrap();
    // html 0, head 1, body 2, p 3, b 4
    assert_eq!(preserved.mapping().get(4).unwrap().tag, "b");
    let target = ScopedTarget {
        id: 4,
        address: Address {
            parent_id: 3,
            child_index: 0,
        },
        preserved,
    };
    engine.replace_scoped("<b>WORLD</b>", &target).unwrap();

    let outcome = engine.finalize().unwrap();
    let expected = parse_document("<p>Hello <b>WORLD</b>!</p>", &ParseLimits::default()).unwrap();
    assert_dom_eq(&expected, &engine.live().unwrap().doc, DomSnapshotOptions::default());
    assert!(outcome.sanitized_markup.contains("<body><p>Hello <b>WORLD</b>!</p></body>"));
}
