use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;
use thai_tokenizer::special::default_special_tokens;
use thai_tokenizer::thai::{SentencePieceTokenizer, WordTokenizer};
use thai_tokenizer::{
    load_tokenizer, Dictionary, DictionarySegmenter, Error, Result, SegmenterKind,
    ThaiTokenizer, TokenizerKind, VocabLimit, WordLevelTrainer,
};

const WORDS: [&str; 5] = ["ฉัน", "กิน", "ข้าว", "อร่อย", "มาก"];

/// Builds `newmm.json` and `dictionary.txt` inside `dir`.
fn write_word_tokenizer(dir: &Path) -> Result<()> {
    let corpus = dir.join("corpus.txt");
    fs::write(&corpus, "ฉันกินข้าว<_>อร่อยมาก\nฉันกินข้าว\n")?;
    fs::write(dir.join("dictionary.txt"), WORDS.join("\n"))?;

    let segmenter = DictionarySegmenter::new(SegmenterKind::Newmm, Dictionary::from_words(WORDS));
    let mut trainer = WordLevelTrainer::new(
        Arc::new(segmenter),
        vec![corpus],
        default_special_tokens(),
        VocabLimit::Unbounded,
    )?;
    trainer.count_all()?;
    trainer.save_vocab(&dir.join("newmm.json"))
}

const SPM_JSON: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [],
  "normalizer": null,
  "pre_tokenizer": {"type": "WhitespaceSplit"},
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {
      "<s>": 0, "<pad>": 1, "</s>": 2, "<unk>": 3, "<mask>": 4, "<_>": 5,
      "▁สวัสดี": 6, "▁โลก": 7, "สวัสดี": 8
    },
    "unk_token": "<unk>"
  }
}"#;

#[test]
fn newmm_tokenizes_prepared_text() -> Result<()> {
    let tmp = tempdir()?;
    write_word_tokenizer(tmp.path())?;
    let tokenizer = load_tokenizer(TokenizerKind::Newmm, tmp.path())?;

    let prepared = tokenizer.prepare_for_tokenization("ฉันกินข้าว อร่อยมาก");
    assert_eq!(prepared, "ฉันกินข้าว<_>อร่อยมาก");

    let tokens = tokenizer.tokenize(&prepared)?;
    assert_eq!(tokens, vec!["ฉัน", "กิน", "ข้าว", "<_>", "อร่อย", "มาก"]);
    assert_eq!(tokenizer.convert_tokens_to_string(&tokens), prepared);
    Ok(())
}

#[test]
fn unknown_words_map_to_unk() -> Result<()> {
    let tmp = tempdir()?;
    write_word_tokenizer(tmp.path())?;
    let tokenizer = load_tokenizer(TokenizerKind::Newmm, tmp.path())?;
    let unk = tokenizer.special_ids().unk;

    assert_eq!(tokenizer.convert_token_to_id("แมว"), unk);
    let tokens = tokenizer.tokenize("ฉันเลี้ยงแมว")?;
    assert_eq!(tokens.first().map(String::as_str), Some("ฉัน"));
    assert!(tokens[1..].iter().all(|token| token == "<unk>"));
    Ok(())
}

#[test]
fn special_token_layout_matches_roberta() -> Result<()> {
    let tmp = tempdir()?;
    write_word_tokenizer(tmp.path())?;
    let tokenizer = load_tokenizer(TokenizerKind::Newmm, tmp.path())?;
    let ids = tokenizer.special_ids();
    assert_eq!((ids.cls, ids.pad, ids.sep, ids.unk), (0, 1, 2, 3));

    let a = [10, 11];
    let b = [12];
    assert_eq!(tokenizer.build_inputs_with_special_tokens(&a, None), vec![0, 10, 11, 2]);
    assert_eq!(
        tokenizer.build_inputs_with_special_tokens(&a, Some(&b)),
        vec![0, 10, 11, 2, 2, 12, 2]
    );

    assert_eq!(tokenizer.get_special_tokens_mask(&a, None, false)?, vec![1, 0, 0, 1]);
    assert_eq!(
        tokenizer.get_special_tokens_mask(&a, Some(&b), false)?,
        vec![1, 0, 0, 1, 1, 0, 1]
    );
    assert_eq!(
        tokenizer.get_special_tokens_mask(&[0, 10, 2], None, true)?,
        vec![1, 0, 1]
    );
    assert!(matches!(
        tokenizer.get_special_tokens_mask(&[0, 10, 2], Some(&b), true),
        Err(Error::Validation(_))
    ));

    assert_eq!(tokenizer.create_token_type_ids_from_sequences(&a, None), vec![0; 4]);
    assert_eq!(tokenizer.create_token_type_ids_from_sequences(&a, Some(&b)), vec![0; 7]);
    Ok(())
}

#[test]
fn encode_truncates_to_max_length() -> Result<()> {
    let tmp = tempdir()?;
    write_word_tokenizer(tmp.path())?;
    let tokenizer = load_tokenizer(TokenizerKind::Newmm, tmp.path())?;

    let encoded = tokenizer.encode("ฉันกินข้าว อร่อยมาก", 5, true)?;
    assert_eq!(encoded.len(), 5);
    assert_eq!(encoded.input_ids.first(), Some(&tokenizer.special_ids().cls));
    assert_eq!(encoded.input_ids.last(), Some(&tokenizer.special_ids().sep));
    assert_eq!(encoded.attention_mask, vec![1; 5]);
    assert_eq!(encoded.token_type_ids, vec![0; 5]);

    let short = tokenizer.encode("ฉัน", 16, true)?;
    assert_eq!(short.len(), 3);
    Ok(())
}

#[test]
fn vocabulary_queries_agree() -> Result<()> {
    let tmp = tempdir()?;
    write_word_tokenizer(tmp.path())?;
    let tokenizer = WordTokenizer::from_dir(SegmenterKind::Newmm, tmp.path())?;

    let vocab = tokenizer.get_vocab();
    assert_eq!(vocab.len(), tokenizer.vocab_size());
    for (token, id) in &vocab {
        assert_eq!(tokenizer.id_to_token(*id).as_deref(), Some(token.as_str()));
        assert_eq!(tokenizer.token_to_id(token), Some(*id));
    }
    Ok(())
}

#[test]
fn save_vocabulary_copies_with_prefix() -> Result<()> {
    let tmp = tempdir()?;
    write_word_tokenizer(tmp.path())?;
    let tokenizer = load_tokenizer(TokenizerKind::Newmm, tmp.path())?;

    let out = tempdir()?;
    let saved = tokenizer.save_vocabulary(out.path(), Some("best"))?;
    assert_eq!(saved, out.path().join("best-newmm.json"));
    assert_eq!(fs::read(&saved)?, fs::read(tmp.path().join("newmm.json"))?);

    let not_a_dir = out.path().join("missing");
    assert!(matches!(
        tokenizer.save_vocabulary(&not_a_dir, None),
        Err(Error::Artifact(_))
    ));
    Ok(())
}

#[test]
fn syllable_falls_back_to_vocab_dictionary() -> Result<()> {
    let tmp = tempdir()?;
    fs::write(
        tmp.path().join("syllable.json"),
        r#"{"<s>":0,"<pad>":1,"</s>":2,"<unk>":3,"<mask>":4,"<_>":5,"\n":6,"สวัส":7,"ดี":8}"#,
    )?;
    let tokenizer = load_tokenizer(TokenizerKind::Syllable, tmp.path())?;
    assert_eq!(tokenizer.kind(), TokenizerKind::Syllable);
    assert_eq!(tokenizer.tokenize("สวัสดี")?, vec!["สวัส", "ดี"]);
    Ok(())
}

#[test]
fn sentencepiece_joins_underlines_as_newlines() -> Result<()> {
    let tmp = tempdir()?;
    fs::write(tmp.path().join("tokenizer.json"), SPM_JSON)?;
    let tokenizer = SentencePieceTokenizer::from_dir(tmp.path())?;

    assert_eq!(tokenizer.kind(), TokenizerKind::Spm);
    assert_eq!(tokenizer.vocab_size(), 9);
    assert_eq!(tokenizer.tokenize("▁สวัสดี ▁โลก")?, vec!["▁สวัสดี", "▁โลก"]);

    let tokens = vec!["▁สวัสดี".to_string(), "▁โลก".to_string()];
    assert_eq!(tokenizer.convert_tokens_to_string(&tokens), "สวัสดี\nโลก");
    Ok(())
}

#[test]
fn unknown_tokenizer_type_is_rejected() {
    assert!(matches!(
        "sefr".parse::<TokenizerKind>(),
        Err(Error::UnsupportedTokenizer(_))
    ));
    assert_eq!("spm".parse::<TokenizerKind>().ok(), Some(TokenizerKind::Spm));
}

#[test]
fn missing_tokenizer_dir_is_an_artifact_error() {
    let result = load_tokenizer(TokenizerKind::Newmm, Path::new("/nonexistent/tokenizer"));
    assert!(matches!(result, Err(Error::Artifact(_))));
}
