#![allow(missing_docs)]

use graphcode::{
    DEFAULT_MAX_DEPTH, Decode, Decoder, Encode, Encoder, Graphcode, GraphcodeError,
    GraphcodeInspector, IdentityPolicy, Result,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

// --- Shared references ---

#[derive(Encode, Decode, Debug, PartialEq)]
struct Texture {
    path: String,
    size: u32,
}

#[derive(Encode, Decode, Debug)]
struct Scene {
    sky: Rc<Texture>,
    props: Vec<Rc<Texture>>,
}

#[test]
fn test_shared_rc_decodes_to_one_allocation() {
    let sky = Rc::new(Texture {
        path: "sky.png".into(),
        size: 2048,
    });
    let rock = Rc::new(Texture {
        path: "rock.png".into(),
        size: 512,
    });
    let scene = Scene {
        sky: sky.clone(),
        props: vec![rock.clone(), sky, rock],
    };

    let bytes = Graphcode::encode(&scene).unwrap();
    let back: Scene = Graphcode::decode(&bytes).unwrap();

    assert!(Rc::ptr_eq(&back.sky, &back.props[1]));
    assert!(Rc::ptr_eq(&back.props[0], &back.props[2]));
    assert!(!Rc::ptr_eq(&back.sky, &back.props[0]));
    assert_eq!(back.props[0].path, "rock.png");

    let report = GraphcodeInspector::inspect_bytes(&bytes).unwrap();
    assert_eq!(report.objects, 2);
    assert_eq!(report.records.pointer, 2);
}

#[test]
fn test_shared_arc_and_shared_scalars() {
    let shared = Arc::new(77u64);
    let bytes = Graphcode::encode(&vec![shared.clone(), shared]).unwrap();
    let back: Vec<Arc<u64>> = Graphcode::decode(&bytes).unwrap();
    assert_eq!(*back[0], 77);
    assert!(Arc::ptr_eq(&back[0], &back[1]));
}

#[test]
fn test_forward_pointer_builds_out_of_order() {
    // The pointer is decoded before the value it points to.
    #[derive(Decode)]
    struct Reversed {
        props: Vec<Rc<Texture>>,
        sky: Rc<Texture>,
    }

    let sky = Rc::new(Texture {
        path: "sky.png".into(),
        size: 1,
    });
    let scene = Scene {
        sky: sky.clone(),
        props: vec![sky],
    };
    let bytes = Graphcode::encode(&scene).unwrap();
    let back: Reversed = Graphcode::decode(&bytes).unwrap();
    assert!(Rc::ptr_eq(&back.sky, &back.props[0]));
}

// --- Declared and hashable identity ---

#[derive(Encode, Decode, Debug, Clone, PartialEq)]
struct Account {
    #[graphcode(id)]
    number: u64,
    owner: String,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq, Hash)]
#[graphcode(hashable)]
struct Tag {
    label: String,
}

#[test]
fn test_declared_identity_deduplicates_by_id() {
    let accounts = vec![
        Account {
            number: 1,
            owner: "first".into(),
        },
        Account {
            number: 2,
            owner: "second".into(),
        },
        Account {
            number: 1,
            owner: "shadowed".into(),
        },
    ];
    let bytes = Graphcode::encode(&accounts).unwrap();
    let back: Vec<Account> = Graphcode::decode(&bytes).unwrap();
    assert_eq!(back.len(), 3);
    // Same id, same object: the first occurrence wins.
    assert_eq!(back[2].owner, "first");
    assert_eq!(back[1].owner, "second");
}

#[test]
fn test_hashable_identity_follows_policy() {
    let tags = vec![
        Tag { label: "a".into() },
        Tag { label: "b".into() },
        Tag { label: "a".into() },
    ];

    let bytes = Graphcode::encode(&tags).unwrap();
    let report = GraphcodeInspector::inspect_bytes(&bytes).unwrap();
    assert_eq!(report.objects, 2);
    assert_eq!(report.records.pointer, 1);
    assert_eq!(Graphcode::decode::<Vec<Tag>>(&bytes).unwrap(), tags);

    let bytes = Graphcode::builder()
        .identity_policy(IdentityPolicy::ReferenceOnly)
        .encode(&tags)
        .unwrap();
    let report = GraphcodeInspector::inspect_bytes(&bytes).unwrap();
    assert_eq!(report.objects, 0);
    assert_eq!(report.records.pointer, 0);
    assert_eq!(Graphcode::decode::<Vec<Tag>>(&bytes).unwrap(), tags);
}

#[derive(Encode, Decode, Debug)]
struct Holdings {
    plain: Account,
    shared: Rc<Account>,
    again: Rc<Account>,
}

#[test]
fn test_bare_and_shared_values_do_not_alias() {
    let holdings = Holdings {
        plain: Account {
            number: 1,
            owner: "plain".into(),
        },
        shared: Rc::new(Account {
            number: 1,
            owner: "shared".into(),
        }),
        again: Rc::new(Account {
            number: 1,
            owner: "again".into(),
        }),
    };
    let bytes = Graphcode::encode(&holdings).unwrap();
    let back: Holdings = Graphcode::decode(&bytes).unwrap();
    assert_eq!(back.plain.owner, "plain");
    assert_eq!(back.shared.owner, "shared");
    // Handles of the same type still deduplicate by declared id.
    assert!(Rc::ptr_eq(&back.shared, &back.again));

    let tag = Tag { label: "x".into() };
    let options = Graphcode::builder().identity_policy(IdentityPolicy::HashableFirst);
    let pair = (tag.clone(), Rc::new(tag));
    let bytes = options.encode(&pair).unwrap();
    let back: (Tag, Rc<Tag>) = options.decode(&bytes).unwrap();
    assert_eq!(back, pair);
}

#[test]
fn test_identity_tracking_off_copies_values() {
    let shared = Rc::new(String::from("copy me"));
    let bytes = Graphcode::builder()
        .track_identity(false)
        .encode(&vec![shared.clone(), shared])
        .unwrap();
    let back: Vec<Rc<String>> = Graphcode::decode(&bytes).unwrap();
    assert_eq!(back[0], back[1]);
    assert!(!Rc::ptr_eq(&back[0], &back[1]));
}

// --- Cycles ---

#[derive(Debug)]
struct Node {
    name: String,
    peer: Option<Rc<RefCell<Node>>>,
}

impl Encode for Node {
    fn encode(&self, encoder: &mut Encoder) -> Result<()> {
        encoder.encode_key("name", &self.name)?;
        encoder.encode_key("peer", &self.peer)
    }
}

impl Decode for Node {
    fn decode(decoder: &mut Decoder<'_>) -> Result<Self> {
        let name = decoder.decode_key("name")?;
        decoder.decode_deferred::<Rc<RefCell<Node>>, Rc<RefCell<Node>>, _>("peer", |me, peer| {
            me.borrow_mut().peer = Some(peer);
        })?;
        Ok(Node { name, peer: None })
    }
}

/// Same layout as `Node`, but reads the peer immediately.
#[derive(Decode, Debug)]
struct EagerNode {
    #[allow(dead_code)]
    name: String,
    #[allow(dead_code)]
    peer: Option<Rc<RefCell<EagerNode>>>,
}

fn pair() -> (Rc<RefCell<Node>>, Rc<RefCell<Node>>) {
    let a = Rc::new(RefCell::new(Node {
        name: "a".into(),
        peer: None,
    }));
    let b = Rc::new(RefCell::new(Node {
        name: "b".into(),
        peer: Some(a.clone()),
    }));
    a.borrow_mut().peer = Some(b.clone());
    (a, b)
}

fn unlink(nodes: &[Rc<RefCell<Node>>]) {
    for node in nodes {
        node.borrow_mut().peer = None;
    }
}

#[test]
fn test_cycle_round_trip_with_deferred_decode() {
    let (a, b) = pair();
    let bytes = Graphcode::encode(&a).unwrap();
    unlink(&[a, b]);

    let back: Rc<RefCell<Node>> = Graphcode::decode(&bytes).unwrap();
    let peer = back.borrow().peer.clone().unwrap();
    assert_eq!(peer.borrow().name, "b");
    let peer_of_peer = peer.borrow().peer.clone().unwrap();
    assert!(Rc::ptr_eq(&peer_of_peer, &back));
    unlink(&[back, peer]);
}

#[test]
fn test_cycle_inside_a_collection() {
    let (a, b) = pair();
    let bytes = Graphcode::encode(&vec![a.clone(), b.clone()]).unwrap();
    unlink(&[a, b]);

    let back: Vec<Rc<RefCell<Node>>> = Graphcode::decode(&bytes).unwrap();
    assert_eq!(back.len(), 2);
    let a_peer = back[0].borrow().peer.clone().unwrap();
    assert!(Rc::ptr_eq(&a_peer, &back[1]));
    let b_peer = back[1].borrow().peer.clone().unwrap();
    assert!(Rc::ptr_eq(&b_peer, &back[0]));
    unlink(&back);
}

#[test]
fn test_cycle_requires_deferred_decode() {
    let (a, b) = pair();
    let bytes = Graphcode::encode(&a).unwrap();
    unlink(&[a, b]);

    let err = Graphcode::decode::<Rc<RefCell<EagerNode>>>(&bytes).unwrap_err();
    assert!(matches!(err, GraphcodeError::CyclicReference { .. }));
}

#[test]
fn test_cycle_without_identity_hits_depth_limit() {
    let (a, b) = pair();
    let err = Graphcode::builder()
        .track_identity(false)
        .max_depth(64)
        .encode(&a)
        .unwrap_err();
    assert!(matches!(err, GraphcodeError::DepthLimit { limit: 64 }));

    let err = Graphcode::builder()
        .track_identity(false)
        .encode(&a)
        .unwrap_err();
    assert!(matches!(
        err,
        GraphcodeError::DepthLimit {
            limit: DEFAULT_MAX_DEPTH
        }
    ));
    unlink(&[a, b]);
}

// --- Conditional references ---

#[derive(Encode, Decode, Debug)]
struct Catalog {
    #[graphcode(conditional)]
    featured: Option<Rc<Texture>>,
    items: Vec<Rc<Texture>>,
}

fn texture(path: &str) -> Rc<Texture> {
    Rc::new(Texture {
        path: path.into(),
        size: 1,
    })
}

#[test]
fn test_conditional_reference_resolves_when_materialized_later() {
    let hero = texture("hero.png");
    let catalog = Catalog {
        featured: Some(hero.clone()),
        items: vec![texture("other.png"), hero],
    };
    let bytes = Graphcode::encode(&catalog).unwrap();

    let report = GraphcodeInspector::inspect_bytes(&bytes).unwrap();
    assert_eq!(report.records.conditional_pointer, 1);
    assert_eq!(report.records.pruned, 0);

    let back: Catalog = Graphcode::decode(&bytes).unwrap();
    let featured = back.featured.unwrap();
    assert!(Rc::ptr_eq(&featured, &back.items[1]));
}

#[test]
fn test_conditional_reference_is_pruned() {
    let catalog = Catalog {
        featured: Some(texture("gone.png")),
        items: vec![texture("kept.png")],
    };
    let bytes = Graphcode::encode(&catalog).unwrap();

    let report = GraphcodeInspector::inspect_bytes(&bytes).unwrap();
    assert_eq!(report.records.pruned, 1);
    assert_eq!(report.objects, 1);

    let back: Catalog = Graphcode::decode(&bytes).unwrap();
    assert!(back.featured.is_none());
    assert_eq!(back.items[0].path, "kept.png");
}

#[test]
fn test_conditional_rules() {
    struct Conditional<T>(T);

    impl<T: Encode> Encode for Conditional<T> {
        fn encode(&self, encoder: &mut Encoder) -> Result<()> {
            encoder.encode_key_conditional("value", &self.0)
        }
    }

    // Trivial values are written unconditionally unless strict.
    let bytes = Graphcode::encode(&Conditional(5u32)).unwrap();
    let report = GraphcodeInspector::inspect_bytes(&bytes).unwrap();
    assert_eq!(report.records.payload, 1);
    let err = Graphcode::builder()
        .strict(true)
        .encode(&Conditional(5u32))
        .unwrap_err();
    assert!(matches!(err, GraphcodeError::ConditionalTrivial { .. }));

    // A structure without identity cannot be referenced conditionally.
    let plain = Texture {
        path: "p".into(),
        size: 0,
    };
    let err = Graphcode::encode(&Conditional(&plain)).unwrap_err();
    assert!(matches!(
        err,
        GraphcodeError::ConditionalWithoutIdentity { .. }
    ));

    // Without identity tracking the reference degrades to a plain value.
    assert!(
        Graphcode::builder()
            .track_identity(false)
            .encode(&Conditional(&plain))
            .is_ok()
    );
    assert!(
        Graphcode::builder()
            .track_identity(false)
            .strict(true)
            .encode(&Conditional(&plain))
            .is_err()
    );
}

// --- Encode-side errors ---

#[test]
fn test_duplicate_key_is_rejected() {
    struct Twice;

    impl Encode for Twice {
        fn encode(&self, encoder: &mut Encoder) -> Result<()> {
            encoder.encode_key("k", &1u8)?;
            encoder.encode_key("k", &2u8)
        }
    }

    let err = Graphcode::encode(&Twice).unwrap_err();
    assert!(matches!(err, GraphcodeError::DuplicateKey { key } if key == "k"));
}

#[test]
fn test_same_key_in_nested_scopes_is_fine() {
    #[derive(Encode, Decode, Debug, PartialEq)]
    struct Inner {
        id: u8,
    }
    #[derive(Encode, Decode, Debug, PartialEq)]
    struct Outer {
        id: u8,
        inner: Inner,
    }
    let value = Outer {
        id: 1,
        inner: Inner { id: 2 },
    };
    let bytes = Graphcode::encode(&value).unwrap();
    assert_eq!(Graphcode::decode::<Outer>(&bytes).unwrap(), value);
    assert_eq!(GraphcodeInspector::inspect_bytes(&bytes).unwrap().keys.len(), 2);
}

#[test]
fn test_payload_misuse() {
    struct Confused;

    impl Encode for Confused {
        fn encode(&self, encoder: &mut Encoder) -> Result<()> {
            encoder.payload()?.write_u8(1);
            Ok(())
        }
    }

    let err = Graphcode::encode(&Confused).unwrap_err();
    assert!(matches!(err, GraphcodeError::Internal(_)));
}

#[test]
fn test_depth_limit_on_decode() {
    let nested = vec![vec![vec![1u8]]];
    let bytes = Graphcode::encode(&nested).unwrap();
    let err = Graphcode::builder()
        .max_depth(2)
        .decode::<Vec<Vec<Vec<u8>>>>(&bytes)
        .unwrap_err();
    assert!(matches!(err, GraphcodeError::DepthLimit { limit: 2 }));
    assert!(
        Graphcode::builder()
            .max_depth(3)
            .decode::<Vec<Vec<Vec<u8>>>>(&bytes)
            .is_ok()
    );
}

#[derive(Encode, Decode, Debug, PartialEq)]
struct Deep {
    level: u32,
    child: Option<Box<Deep>>,
}

fn deep(levels: u32) -> Deep {
    let mut node = Deep {
        level: 0,
        child: None,
    };
    for level in 1..levels {
        node = Deep {
            level,
            child: Some(Box::new(node)),
        };
    }
    node
}

#[test]
fn test_nesting_up_to_the_default_limit() {
    let levels = DEFAULT_MAX_DEPTH as u32;
    let value = deep(levels);
    let bytes = Graphcode::encode(&value).unwrap();
    assert_eq!(GraphcodeInspector::inspect_bytes(&bytes).unwrap().max_depth, DEFAULT_MAX_DEPTH);
    assert_eq!(Graphcode::decode::<Deep>(&bytes).unwrap(), value);

    let too_deep = deep(levels + 1);
    let err = Graphcode::encode(&too_deep).unwrap_err();
    assert!(matches!(
        err,
        GraphcodeError::DepthLimit {
            limit: DEFAULT_MAX_DEPTH
        }
    ));
    let bytes = Graphcode::builder()
        .max_depth(DEFAULT_MAX_DEPTH + 1)
        .encode(&too_deep)
        .unwrap();
    let err = Graphcode::decode::<Deep>(&bytes).unwrap_err();
    assert!(matches!(
        err,
        GraphcodeError::DepthLimit {
            limit: DEFAULT_MAX_DEPTH
        }
    ));
}

// --- Forward pointer chains ---

#[derive(Encode, Decode, Debug)]
struct Link {
    n: u32,
    #[graphcode(conditional)]
    next: Option<Rc<Link>>,
}

/// `len` links in a vector, each pointing conditionally at the one after it.
fn chain(len: u32) -> Vec<Rc<Link>> {
    let mut links = Vec::new();
    let mut next = None;
    for n in (0..len).rev() {
        let link = Rc::new(Link { n, next: next.take() });
        next = Some(Rc::clone(&link));
        links.push(link);
    }
    links.reverse();
    links
}

#[test]
fn test_long_forward_chain_stops_at_depth_limit() {
    let bytes = Graphcode::encode(&chain(1_200)).unwrap();
    let err = Graphcode::decode::<Vec<Rc<Link>>>(&bytes).unwrap_err();
    assert!(matches!(
        err,
        GraphcodeError::DepthLimit {
            limit: DEFAULT_MAX_DEPTH
        }
    ));
}

#[test]
fn test_long_forward_chain_with_raised_limit() {
    let bytes = Graphcode::encode(&chain(1_200)).unwrap();
    let worker = std::thread::Builder::new()
        .stack_size(64 << 20)
        .spawn(move || -> Result<(usize, u32, bool)> {
            let back: Vec<Rc<Link>> = Graphcode::builder().max_depth(4_096).decode(&bytes)?;
            let linked = back
                .windows(2)
                .all(|w| w[0].next.as_ref().is_some_and(|n| Rc::ptr_eq(n, &w[1])));
            Ok((back.len(), back[1_199].n, linked))
        })
        .unwrap();
    let (len, last, linked) = worker.join().unwrap().unwrap();
    assert_eq!((len, last, linked), (1_200, 1_199, true));
}
